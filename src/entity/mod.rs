pub mod affiliate_commissions;
pub mod discount_codes;
pub mod order_items;
pub mod orders;
pub mod products;
pub mod users;

pub use affiliate_commissions::Entity as AffiliateCommissions;
pub use discount_codes::Entity as DiscountCodes;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
pub use users::Entity as Users;
