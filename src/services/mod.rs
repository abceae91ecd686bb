// Services module
// Each stage of a job is handled by one service: provisioning, fetching inputs,
// running inference and publishing the result

pub mod fetcher;
pub mod inference;
pub mod provisioner;
pub mod publisher;

pub use fetcher::RemoteFetcher;
pub use inference::{InferenceInvoker, InferenceParams};
pub use provisioner::{HuggingFaceCli, ModelHub, ModelProvisioner, ProvisionedModels};
pub use publisher::ResultPublisher;
