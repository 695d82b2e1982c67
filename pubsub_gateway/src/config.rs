use std::{sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use pubsub_gateway_backend::{
    gcp::GcpProvider, memory::MemoryProvider, provider::PubSubProvider, Backend, PullSettings,
};

use crate::error::FatalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Google Cloud Pub/Sub, or the emulator when `PUBSUB_EMULATOR_HOST` is set.
    Gcp,
    /// In-process topics and subscriptions that vanish on exit.
    Memory,
}

#[derive(Parser, Debug)]
#[command(version, about = "HTTP gateway for Pub/Sub administration, publishing and pulling")]
pub struct Args {
    /// Address to listen on.
    #[arg(long, env = "PUBSUB_GATEWAY_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    #[arg(long, env = "PUBSUB_GATEWAY_PROVIDER", value_enum, default_value_t = ProviderKind::Gcp)]
    pub provider: ProviderKind,

    /// Optional override for the Pub/Sub Emulator project ID.
    #[arg(long, env = "PUBSUB_EMULATOR_PROJECT_ID")]
    pub emulator_project_id: Option<String>,

    /// Maximum number of messages fetched by `/pull`.
    #[arg(
        long,
        env = "PUBSUB_GATEWAY_PULL_MAX_MESSAGES",
        default_value_t = 10,
        value_parser = clap::value_parser!(i32).range(1..)
    )]
    pub pull_max_messages: i32,

    /// Maximum number of messages fetched from each subscription by `/multipull`.
    #[arg(
        long,
        env = "PUBSUB_GATEWAY_MULTIPULL_MAX_MESSAGES",
        default_value_t = 1000,
        value_parser = clap::value_parser!(i32).range(1..)
    )]
    pub multipull_max_messages: i32,

    /// How long a Pub/Sub pull may wait for messages, in milliseconds, before it counts as empty.
    #[arg(
        long,
        env = "PUBSUB_GATEWAY_PULL_WAIT_MS",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub pull_wait_ms: u64,
}

impl Args {
    pub fn pull_settings(&self) -> PullSettings {
        PullSettings {
            pull_max_messages: self.pull_max_messages,
            multipull_max_messages: self.multipull_max_messages,
        }
    }

    pub async fn backend(&self) -> Result<Backend, FatalError> {
        let provider: Arc<dyn PubSubProvider> = match self.provider {
            ProviderKind::Gcp => {
                let pull_wait = Duration::from_millis(self.pull_wait_ms);
                Arc::new(GcpProvider::connect(self.emulator_project_id.clone(), pull_wait).await?)
            }
            ProviderKind::Memory => {
                log::warn!("Using the in-memory provider; nothing is sent to Pub/Sub");
                Arc::new(MemoryProvider::new())
            }
        };

        Ok(Backend::new(provider, self.pull_settings()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["pubsub_gateway"]).unwrap();

        assert_eq!(args.bind, "0.0.0.0:8080");
        assert_eq!(args.provider, ProviderKind::Gcp);
        assert_eq!(args.pull_settings(), PullSettings::default());
        assert_eq!(args.pull_wait_ms, 1000);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "pubsub_gateway",
            "--bind",
            "127.0.0.1:9000",
            "--provider",
            "memory",
            "--pull-max-messages",
            "3",
            "--emulator-project-id",
            "local-project",
        ])
        .unwrap();

        assert_eq!(args.bind, "127.0.0.1:9000");
        assert_eq!(args.provider, ProviderKind::Memory);
        assert_eq!(args.pull_settings().pull_max_messages, 3);
        assert_eq!(args.pull_settings().multipull_max_messages, 1000);
        assert_eq!(args.emulator_project_id.as_deref(), Some("local-project"));
    }

    #[test]
    fn batch_sizes_must_be_positive() {
        for flag in ["--pull-max-messages", "--multipull-max-messages", "--pull-wait-ms"] {
            for value in ["0", "-5"] {
                let result = Args::try_parse_from(["pubsub_gateway", flag, value]);
                assert!(result.is_err(), "{flag} {value} was accepted");
            }
        }
    }

    #[test]
    fn command_is_well_formed() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
