// Query helpers over the sync schema. All functions are generic over
// `ConnectionTrait` so reconcilers can run them inside a transaction.

pub mod bookmarks;
pub mod progress;
pub mod settings;
