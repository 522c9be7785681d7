//! Ports - 抽象化レイヤー
//!
//! core が依存する trait 群。実装は `store` に置く。

pub mod clock;
pub mod id_generator;
pub mod job_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::JobStore;
