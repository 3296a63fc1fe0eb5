//! Sea-ORM entities for bazaar-store

pub mod documents;

pub use documents::Entity as Documents;
