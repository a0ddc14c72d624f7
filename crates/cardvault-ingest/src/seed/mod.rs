//! Seed stage: load partition files into the downstream store

pub mod assets;
pub mod orchestrator;
pub mod sink;

pub use assets::{
    AssetCodec, AssetPipeline, AssetSource, AssetStore, EncodedAsset, HttpAssetSource,
    MemoryAssetStore, PassthroughCodec, S3AssetStore,
};
pub use orchestrator::{
    load_index, plan_seed, plan_work, SeedOptions, SeedOrchestrator, SeedPlan, SeedReport,
    WorkItem,
};
pub use sink::{MemorySink, PostgresSink, Sink};
