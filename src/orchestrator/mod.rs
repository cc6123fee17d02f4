//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责请求调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 应用
//! - 管理应用生命周期（初始化、运行、退出）
//! - 组装路由与请求入口
//!
//! ### `request_gate` - 请求入口
//! - 校验 email / secret
//! - 为每个请求创建全新的 ChainDriver（独立 cookie、浏览器会话、模型调用）
//! - 把 ChainState 整理成响应
//!
//! ## 层次关系
//!
//! ```text
//! api (HTTP 路由)
//!     ↓
//! request_gate (处理单个请求)
//!     ↓
//! workflow::ChainDriver (处理一条题目链)
//!     ↓
//! services (能力层：fetch / extract / reason / submit)
//!     ↓
//! infrastructure (基础设施：Renderer、Clock)
//! ```
//!
//! ## 设计原则
//!
//! 1. **资源隔离**：请求之间不共享任何会话
//! 2. **向下依赖**：编排层 → workflow → services → infrastructure
//! 3. **无业务逻辑**：只做调度和结果整理

pub mod app;
pub mod request_gate;

// 重新导出主要类型
pub use app::App;
pub use request_gate::{DriverFactory, LiveDriverFactory, RequestGate, SolveResponse, SolveResult};
