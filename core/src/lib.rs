//! Personalization-delivery client core.
//!
//! Builds delivery-API request payloads, parses delivery responses, keeps
//! session and visitor-identity state with time-based invalidation, and runs
//! the in-app preview deep-link protocol. Transport, storage and UI are
//! supplied by the host through the traits in [`services`] and [`store`].

mod client;
mod clock;
mod config;
mod error;
mod http;
pub mod json;
mod params;
pub mod preview;
pub mod request_builder;
pub mod response_parser;
pub mod services;
mod state;
pub mod store;

pub use client::DeliveryClient;
pub use client::MboxContent;
pub use client::SharedStates;
pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use config::ConfigSnapshot;
pub use config::DEFAULT_NETWORK_TIMEOUT_SECS;
pub use config::DEFAULT_SESSION_TIMEOUT_SECS;
pub use config::PrivacyStatus;
pub use error::DeliveryError;
pub use error::Result;
pub use http::ReqwestNetworking;
pub use params::MboxPrefetch;
pub use params::MboxRequest;
pub use params::ParameterMap;
pub use params::TargetOrder;
pub use params::TargetParameters;
pub use params::TargetProduct;
pub use params::merge;
pub use preview::PreviewController;
pub use preview::PreviewPhase;
pub use request_builder::IdentitySnapshot;
pub use request_builder::PayloadBuilder;
pub use request_builder::RawRequest;
pub use state::MboxCache;
pub use state::SHARED_STATE_THIRD_PARTY_ID;
pub use state::SHARED_STATE_TNT_ID;
pub use state::StateStore;
pub use state::edge_host_for_tnt_id;
pub use store::DataStore;
pub use store::InMemoryDataStore;
pub use store::JsonFileDataStore;
