//! # Quiz Chain Solver
//!
//! 自动解答网页题目链的服务：抓取题目、提取内容、请求模型作答、提交答案、跟随下一题
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（浏览器、时钟），只暴露能力
//! - `Renderer` - 每次渲染独立启动无头浏览器，用完即关
//! - `Clock` - 链路读取时间的唯一入口，测试中可手动推进
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个页面
//! - `PageFetcher` - 抓取与内容类型判定
//! - `ContentExtractor` - 按类型的有序提取策略
//! - `Reasoner` - 单次模型调用与答案解析
//! - `AnswerSubmitter` - 提交答案并解释响应
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一条题目链"的完整处理流程
//! - `StepCtx` - 上下文封装（步骤序号 + 地址）
//! - `ChainDriver` - 状态机（抓取 → 提取 → 推理 → 提交 → 下一题），负责截止时间与重试
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/request_gate` - 身份校验，为每个请求组装协作者
//! - `orchestrator/app` - 应用生命周期与 HTTP 服务
//!
//! ## 模块结构

pub mod api;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, ErrorKind};
pub use models::{ChainState, ChainStatus, QuizChainRequest, TerminationReason};
pub use orchestrator::{App, RequestGate, SolveResponse};
pub use workflow::{ChainDriver, StepCtx};
