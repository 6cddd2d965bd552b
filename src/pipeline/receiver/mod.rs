//! Receiver pipeline stages
//!
//! ```text
//! Network → Fec → Reorder → ReceiverReport → FrameAssembly → frames
//!                              ↓ RR
//! Network ←──────────────────────
//! ```

pub mod assembly_stage;
pub mod coordinator;
pub mod fec_stage;
pub mod reorder_stage;
pub mod report_stage;

pub use assembly_stage::FrameAssemblyStage;
pub use coordinator::build_receiver_pipeline;
pub use fec_stage::FecStage;
pub use reorder_stage::{MAX_QUEUE_SIZE, PacketReorderQueue, PushOutcome, ReorderConfig, ReorderStage};
pub use report_stage::{ReceiverReportStage, ReportConfig};
