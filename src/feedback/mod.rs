pub mod image;
pub mod prompts;
pub mod safety;
pub mod session;
pub mod vocabulary;

pub use image::ImageRef;
pub use session::{FeedbackService, FeedbackSession};
