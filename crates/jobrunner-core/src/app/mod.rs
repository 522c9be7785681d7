//! App - アプリケーション層
//!
//! store / registry / engine を組み合わせて、呼び出し側に見せる API を提供する。
//!
//! # 主要コンポーネント
//! - **JobService**: 投入・参照・一覧・キャンセル・再投入
//! - **Runner**: 配線と dispatcher の起動

pub mod runner;
pub mod service;

pub use self::runner::Runner;
pub use self::service::JobService;
