//! `heatrelay` - Short-code caregiver pairing and daily heat-action relay
//!
//! A caregiver is issued a short code and token that pair them with an elder.
//! Each hot day the elder confirms the suggested actions or asks for help;
//! days nobody answers are escalated up a relay ladder, and every community
//! gets a daily rollup with outreach suggestions.
//!
//! [`HeatRelayService`] is the entry point for any transport.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod audit;
pub mod cli;
pub mod clock;
pub mod config;
pub mod daily;
pub mod error;
pub mod lockout;
pub mod logging;
pub mod message;
pub mod pairing;
pub mod risk;
pub mod rollup;
pub mod scheduler;
pub mod secret;
pub mod service;
pub mod storage;
pub mod weather;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use daily::{DailyStatus, RelayStage, Transition};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use pairing::{IssuedLink, Pair, Redemption};
pub use risk::{HeatRiskScorer, RiskLevel};
pub use rollup::CommunityDaily;
pub use service::HeatRelayService;
pub use storage::{Storage, StorageStats};
pub use weather::{StaticWeather, WeatherGateway};
