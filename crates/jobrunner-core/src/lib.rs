//! jobrunner-core
//!
//! 優先度付き・リトライ可能・キャンセル可能なバックグラウンドジョブ実行基盤。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, request, record, state, query）
//! - **ports**: 抽象化レイヤー（JobStore, Clock, IdGenerator）
//! - **store**: JobStore 実装（インメモリ、feature `sqlite` で SQLite）
//! - **registry**: 許可されたターゲットとハンドラ。起動時に確定する
//! - **engine**: リトライポリシー、executor（状態機械）、優先度 dispatcher
//! - **app**: JobService と Runner の配線
//! - **config**: RunnerConfig（TOML + `JOBRUNNER_*` 環境変数）

pub mod app;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod observability;
pub mod ports;
pub mod registry;
pub mod store;

pub use app::{JobService, Runner};
pub use config::{ConfigError, RunnerConfig};
pub use domain::{JobFilter, JobId, JobPage, JobRecord, JobRequest, JobStatus, Page};
pub use engine::{Completion, DispatcherHandle, RetryPolicy};
pub use error::JobError;
pub use observability::StatusCounts;
pub use registry::{ArgKind, HandlerError, JobHandler, Registry, Signature, handler_fn};
