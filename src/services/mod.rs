pub mod admin_service;
pub mod auth_service;
pub mod cart_service;
pub mod chat_service;
pub mod checkout_service;
pub mod commission_service;
pub mod discount_service;
pub mod guest_service;
pub mod order_service;
pub mod product_service;
pub mod wishlist_service;
