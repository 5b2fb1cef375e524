//! In-app preview mode.
//!
//! A QA deep link carrying `at_preview_token` switches the client into
//! preview mode: a floating button is shown, the selection page is fetched
//! from the preview endpoint and displayed full screen, and the page answers
//! through `adbinapp://confirm` or `adbinapp://cancel` URLs. Confirmed
//! preview parameters are merged into every outbound delivery request.

mod controller;
mod link;

pub use controller::PreviewController;
pub use controller::PreviewPhase;
pub use link::DEFAULT_PREVIEW_ENDPOINT;

#[cfg(test)]
mod tests;
