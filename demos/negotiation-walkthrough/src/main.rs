//! Runs a provider and a consumer in one process, negotiates an agreement
//! between them, and enforces it against a usage counter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use dsp_connector::config::{ConfigLoader, ConnectorConfig};
use dsp_connector::negotiation::{
    ConsumerDispatcher, ContractNegotiation, InMemoryNegotiationStore, LoopbackPeer,
    NegotiationCore, NegotiationSettings, NegotiationState, ProviderDispatcher,
};
use dsp_connector::policy::{
    Action, Agreement, CatalogOfferValidator, Constraint, EnforcementContext,
    InMemoryAccessCounter, InMemoryPolicyAdministration, LeftOperand, Offer, Operator,
    Permission, PolicyEnforcer,
};
use dsp_connector::primitives::ProviderPid;
use dsp_connector::telemetry::{LogFormat, init_tracing};
use tracing::{info, warn};

const CONSUMER_ADDRESS: &str = "loopback://consumer";

#[derive(Debug, Parser)]
#[command(name = "negotiation-walkthrough", about = "In-process contract negotiation walkthrough")]
struct Args {
    /// JSON configuration file; environment overrides still apply.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Let both parties advance without operator review.
    #[arg(long)]
    automatic: bool,
    /// Usage limit written into the offer.
    #[arg(long, default_value_t = 3)]
    limit: u64,
    /// Accesses to attempt once the agreement is finalized.
    #[arg(long, default_value_t = 4)]
    accesses: u64,
    /// Compact log lines.
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load()?;
    if args.automatic {
        config.negotiation.automatic = true;
    }

    let format = if args.compact {
        LogFormat::Compact
    } else {
        LogFormat::Pretty
    };
    init_tracing(&config.log.filter, format)?;

    let offer = offer(args.limit);
    let parties = Parties::build(&config, offer.clone())?;

    let negotiation = if config.negotiation.automatic {
        parties.run_automatic(offer).await?
    } else {
        parties.run_manual(offer).await?
    };
    let agreement = negotiation
        .agreement()
        .cloned()
        .context("finalized negotiation carries no agreement")?;
    info!(
        provider_pid = %negotiation.provider_pid(),
        consumer_pid = %negotiation.consumer_pid(),
        agreement_id = %agreement.id(),
        "negotiation finalized"
    );

    enforce(&parties.metering, &agreement, args.accesses).await
}

fn offer(limit: u64) -> Offer {
    let expires = Utc::now() + chrono::Duration::days(1);
    Offer::new(
        "urn:offer:weather-feed",
        "urn:asset:weather-feed",
        "urn:participant:provider",
        "urn:participant:consumer",
    )
    .with_permission(
        Permission::new(Action::Use)
            .with_constraint(Constraint::new(
                LeftOperand::Count,
                Operator::Lteq,
                limit.to_string(),
            ))
            .with_constraint(Constraint::new(
                LeftOperand::DateTime,
                Operator::Lt,
                expires.to_rfc3339(),
            )),
    )
}

struct Parties {
    provider: Arc<ProviderDispatcher>,
    consumer: Arc<ConsumerDispatcher>,
    provider_address: String,
    metering: Arc<InMemoryAccessCounter>,
}

impl Parties {
    fn build(config: &ConnectorConfig, offer: Offer) -> Result<Self> {
        let provider_settings = NegotiationSettings::try_from(config)?;
        let consumer_settings = NegotiationSettings::new(CONSUMER_ADDRESS)
            .with_automatic(provider_settings.automatic())
            .with_retry(provider_settings.retry());
        let provider_address = provider_settings.callback_address().to_owned();

        let catalog = Arc::new(CatalogOfferValidator::new());
        catalog.publish(offer);
        let metering = Arc::new(InMemoryAccessCounter::new());
        let loopback = Arc::new(LoopbackPeer::new());

        let provider = ProviderDispatcher::new(
            NegotiationCore::new(
                Arc::new(InMemoryNegotiationStore::new()),
                loopback.clone(),
                provider_settings,
            ),
            catalog,
            Arc::new(InMemoryPolicyAdministration::new(Arc::clone(&metering))),
        );
        let consumer = ConsumerDispatcher::new(
            NegotiationCore::new(
                Arc::new(InMemoryNegotiationStore::new()),
                loopback.clone(),
                consumer_settings,
            ),
            Arc::new(InMemoryPolicyAdministration::new(Arc::new(
                InMemoryAccessCounter::new(),
            ))),
        );
        loopback.register_provider(provider_address.clone(), &provider);
        loopback.register_consumer(CONSUMER_ADDRESS, &consumer);

        Ok(Self {
            provider,
            consumer,
            provider_address,
            metering,
        })
    }

    async fn run_manual(&self, offer: Offer) -> Result<ContractNegotiation> {
        info!("--- manual negotiation ---");
        let requested = self
            .consumer
            .request_negotiation(&self.provider_address, offer)
            .await?;
        let provider_pid = requested.provider_pid().clone();
        let consumer_pid = requested.consumer_pid().clone();

        self.provider.send_agreement(&provider_pid).await?;
        self.consumer.verify_agreement(&consumer_pid).await?;
        Ok(self.provider.finalize(&provider_pid).await?)
    }

    async fn run_automatic(&self, offer: Offer) -> Result<ContractNegotiation> {
        info!("--- automatic negotiation ---");
        let requested = self
            .consumer
            .request_negotiation(&self.provider_address, offer)
            .await?;
        let provider_pid = requested.provider_pid().clone();

        tokio::time::timeout(Duration::from_secs(5), self.wait_for_final(&provider_pid))
            .await
            .context("negotiation did not finish within 5s")?
    }

    async fn wait_for_final(&self, provider_pid: &ProviderPid) -> Result<ContractNegotiation> {
        loop {
            let negotiation = self.provider.negotiation_by_provider_pid(provider_pid).await?;
            match negotiation.state() {
                NegotiationState::Finalized => return Ok(negotiation),
                NegotiationState::Terminated => bail!("negotiation {provider_pid} was terminated"),
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    }
}

async fn enforce(
    metering: &Arc<InMemoryAccessCounter>,
    agreement: &Agreement,
    accesses: u64,
) -> Result<()> {
    info!("--- enforcement ---");
    let enforcer = PolicyEnforcer::with_default_handlers(metering.clone());
    let context = EnforcementContext::new(agreement.id().clone());

    for attempt in 1..=accesses {
        let count = metering.record_access(agreement.id())?;
        let decision = enforcer.enforce_policy(agreement, &context).await;
        if decision.is_allowed() {
            info!(attempt, count, "access allowed");
        } else {
            warn!(attempt, count, reason = decision.message(), "access denied");
        }
    }
    Ok(())
}
