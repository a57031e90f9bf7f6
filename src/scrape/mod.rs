pub mod fetch;
pub mod paginate;
pub mod session;

pub use fetch::{HttpFetcher, PageFetcher};
pub use session::ScrapeSession;
