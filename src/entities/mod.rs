pub mod cart;
pub mod cart_item;
pub mod guest_session;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod payment_method;
pub mod product;
pub mod promo_code;
pub mod promo_usage;

pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use guest_session::{Entity as GuestSession, Model as GuestSessionModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment::{Entity as Payment, Model as PaymentModel};
pub use payment_method::{Entity as PaymentMethod, Model as PaymentMethodModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use promo_code::{Entity as PromoCode, Model as PromoCodeModel};
pub use promo_usage::{Entity as PromoUsage, Model as PromoUsageModel};
