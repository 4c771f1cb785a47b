pub mod carts;
pub mod checkout;
pub mod identity;
pub mod inventory;
pub mod order_status;
pub mod orders;
pub mod products;
pub mod promotions;

pub use carts::CartService;
pub use checkout::CheckoutService;
pub use identity::IdentityService;
pub use inventory::InventoryService;
pub use order_status::OrderStatusService;
pub use orders::OrderService;
pub use products::ProductService;
pub use promotions::PromotionService;
