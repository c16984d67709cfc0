pub mod bookmark;
pub mod progress;
pub mod setting;

pub use bookmark::Entity as Bookmark;
pub use progress::Entity as Progress;
pub use setting::Entity as Setting;
