pub mod admin;
pub mod affiliates;
pub mod auth;
pub mod cart;
pub mod chat;
pub mod discounts;
pub mod orders;
pub mod products;
pub mod wishlist;
