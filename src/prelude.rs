#![allow(unused_imports)]

pub use crate::error::{Error, Result};
pub use async_trait::async_trait;
pub use futures::StreamExt;
pub use futures::stream::BoxStream;
pub use serde::{Deserialize, Serialize};
pub use std::collections::{BTreeMap, HashMap, HashSet};
pub use std::sync::Arc;

pub use tracing::{debug, error, info, trace, warn};
