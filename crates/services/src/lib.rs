#![forbid(unsafe_code)]

pub mod app_services;
pub mod chain;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod remote;
pub mod runtime;
pub mod session;
pub mod tracker;
pub mod view;

pub use exam_core::Clock;

pub use app_services::ExamServices;
pub use chain::{ChainNavigator, ChainStep, CourseLink};
pub use checkpoint::CheckpointScheduler;
pub use config::{RemoteConfig, RuntimeConfig};
pub use error::{ConfigError, ExamServicesError, RemoteError, RuntimeError};
pub use remote::{HttpRemoteAuthority, RemoteAuthority};
pub use runtime::{PartContext, PartRuntime};
pub use session::{ExamSession, ReturnToOrigin, SessionOptions};
pub use tracker::ElapsedTimeTracker;
pub use view::PartView;
