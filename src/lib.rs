//! # repool
//!
//! A bounded, thread-safe cache of reusable instances: database connections,
//! sockets, or any expensive-to-construct handle. The pool lends instances
//! on demand, takes them back when the borrower is done, validates them at
//! configurable lifecycle points, and evicts instances that have sat idle
//! too long.
//!
//! Construction, cleanup, and validation are delegated to a caller-supplied
//! [`Factory`]; the pool is generic in the subject type it manages.
//!
//! ```
//! use repool::{Factory, Pool, PoolConfig};
//!
//! struct Connections;
//!
//! impl Factory for Connections {
//!     type Subject = String;
//!
//!     fn create(&self) -> Result<String, repool::BoxError> {
//!         Ok("connection".to_string())
//!     }
//! }
//!
//! let pool = Pool::new(Connections, PoolConfig::default())?;
//! let conn = pool.borrow()?;
//! assert_eq!(&*conn, "connection");
//! drop(conn); // back to the idle set
//! assert_eq!(pool.num_idle(), 1);
//! # Ok::<(), repool::Error>(())
//! ```

pub mod config;
mod deque;
pub mod error;
pub mod factory;
pub mod guard;
pub mod object;
pub mod policy;
pub mod pool;
mod registry;
pub mod scheduler;
pub mod stats;

pub use config::PoolConfig;
pub use error::{BoxError, Error, Result, SwallowedErrorListener};
pub use factory::Factory;
pub use guard::Pooled;
pub use object::{PooledObject, PooledState};
pub use policy::{DEFAULT_POLICY_TAG, DefaultEvictionPolicy, EvictionContext, EvictionPolicy};
pub use pool::Pool;
pub use scheduler::{EvictionScheduler, TaskHandle};
pub use stats::PoolMetrics;
