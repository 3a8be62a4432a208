pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::{broadcast, mpsc};

pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::error::Error;
pub use crate::keba;
pub use crate::keba::charger::{ChargeStatus, Charger};
pub use crate::keba::dispatcher::Dispatcher;
pub use crate::options::Options;
pub use crate::scheduler::Scheduler;
