// Scheduler orchestrator: due-job detection and per-job pipeline runs

pub mod engine;
pub mod job_table;

pub use engine::{
    EngineStores, Pipeline, RunOutcome, RunReport, Scheduler, SchedulerConfig, SchedulerEngine,
};
pub use job_table::{JobState, JobTable};
