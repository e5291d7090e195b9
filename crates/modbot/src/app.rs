use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use modbot_core::{
    autoquotes::AutoQuoteScheduler,
    commands::Registry,
    config::Config,
    dispatch::{Dispatcher, Service, ServiceConfig},
    domain::ChatTarget,
    errors::Error,
    handlers::{
        auto_quotes, ban_roulette, chat_control, custom_commands, help, quotes, shower_thought,
    },
    messaging::{
        port::ChatTransport,
        queue::OutboundQueue,
        sender::{ChatGate, SendPolicy, SenderLoop},
        throttled::{ThrottleConfig, ThrottledTransport},
    },
    retry::RetryPolicy,
    sheets::{QuoteSheet, SheetSync},
    storage::Store,
    tasks::{forward_reports, report_channel, ReportSender, Supervisor},
};
use modbot_reddit::RedditClient;
use modbot_sheets::GoogleSheetsClient;
use modbot_twitch::{TwitchConfig, TwitchTransport};

/// Start the spreadsheet worker when a token and sheet id are configured.
fn start_sheet_sync(
    cfg: &Config,
    store: &Store,
    reports: ReportSender,
    cancel: &CancellationToken,
    supervisor: &mut Supervisor,
) -> anyhow::Result<Option<SheetSync>> {
    let (Some(token), Some(spreadsheet_id)) =
        (&cfg.google_sheets_token, &cfg.quotes_spreadsheet_id)
    else {
        tracing::info!("quote spreadsheet sync disabled");
        return Ok(None);
    };

    let client = Arc::new(GoogleSheetsClient::new(token.clone())?);
    let sheet = QuoteSheet {
        spreadsheet_id: spreadsheet_id.clone(),
        worksheet: cfg.quotes_worksheet.clone(),
    };
    let (sync, worker) = SheetSync::spawn(
        client,
        sheet,
        store.clone(),
        RetryPolicy::new(cfg.sheet_sync_max_attempts, cfg.sheet_sync_delay),
        reports,
        cancel.clone(),
    );
    supervisor.spawn("spreadsheet sync", async move {
        worker
            .await
            .map_err(|e| Error::External(format!("spreadsheet worker died: {e}")))
    });
    Ok(Some(sync))
}

fn build_registry(
    cfg: &Config,
    store: &Store,
    gate: &ChatGate,
    sheet_sync: Option<SheetSync>,
    scheduler: &AutoQuoteScheduler,
) -> anyhow::Result<Registry> {
    let prefix = cfg.command_prefix.clone();
    let mut registry = Registry::new();

    registry.register(
        quotes::SPECS,
        Arc::new(quotes::QuoteHandler::new(
            store.clone(),
            sheet_sync,
            cfg.quotes_spreadsheet_link.clone(),
        )),
    );
    registry.register(
        ban_roulette::SPECS,
        Arc::new(ban_roulette::BanRoulette::new(cfg.ban_roulette_timeout_secs)),
    );
    registry.register(
        auto_quotes::SPECS,
        Arc::new(auto_quotes::AutoQuoteCommands::new(
            store.clone(),
            scheduler.clone(),
        )),
    );
    registry.register(
        custom_commands::SPECS,
        Arc::new(custom_commands::CustomCommands::new(store.clone(), prefix.clone())),
    );
    registry.register(
        chat_control::SPECS,
        Arc::new(chat_control::ChatControl::new(store.clone(), gate.clone())),
    );
    registry.register(help::SPECS, Arc::new(help::Help::new(store.clone(), prefix)));

    match cfg.reddit.clone() {
        Some(creds) => {
            let reddit = RedditClient::new(creds).context("reddit client")?;
            registry.register(
                shower_thought::SPECS,
                Arc::new(shower_thought::ShowerThought::new(Arc::new(reddit))),
            );
        }
        None => tracing::info!("reddit credentials missing; !shower_thought disabled"),
    }

    Ok(registry)
}

pub async fn run(cfg: Config) -> anyhow::Result<()> {
    let store = Store::open(&cfg.database_path).context("open database")?;
    let gate = ChatGate::new(chat_control::load_chat_flag(&store)?);
    let home = ChatTarget::channel(&cfg.twitch_channel);

    let transport = Arc::new(ThrottledTransport::new(
        TwitchTransport::new(TwitchConfig::from_config(&cfg)),
        ThrottleConfig {
            global_min_interval: cfg.global_send_interval,
            per_target_min_interval: cfg.per_target_send_interval,
        },
    ));
    let queue = Arc::new(OutboundQueue::new());
    let cancel = CancellationToken::new();
    let (reports_tx, reports_rx) = report_channel();
    let mut supervisor = Supervisor::new(reports_tx.clone());

    let sheet_sync =
        start_sheet_sync(&cfg, &store, reports_tx.clone(), &cancel, &mut supervisor)?;
    let scheduler = AutoQuoteScheduler::new(
        store.clone(),
        queue.clone(),
        home.clone(),
        reports_tx,
    );
    let registry = build_registry(&cfg, &store, &gate, sheet_sync, &scheduler)?;

    let dispatcher = Arc::new(Dispatcher::new(
        cfg.command_prefix.clone(),
        registry,
        store.clone(),
        transport.capabilities().max_message_len,
    ));
    let service = Arc::new(Service::new(
        transport.clone(),
        dispatcher,
        queue.clone(),
        ServiceConfig {
            backoff_initial: cfg.transport_backoff_initial,
            backoff_max: cfg.transport_backoff_max,
        },
    ));
    let sender = SenderLoop::new(
        transport,
        queue.clone(),
        gate.clone(),
        SendPolicy {
            max_attempts: cfg.send_max_attempts,
            ..SendPolicy::default()
        },
    );

    supervisor.spawn("dispatch loop", {
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });
    supervisor.spawn("sender loop", {
        let cancel = cancel.clone();
        async move {
            sender.run(cancel).await;
            Ok(())
        }
    });
    supervisor.spawn(
        "task reports",
        forward_reports(reports_rx, queue.clone(), home.clone(), cancel.clone()),
    );

    tracing::info!(
        channel = %home,
        prefix = %cfg.command_prefix,
        allowed_to_chat = gate.is_allowed(),
        sheets = cfg.sheets_enabled(),
        tasks = supervisor.len(),
        "modbot started"
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listen for ctrl-c")?;
            tracing::info!("shutdown requested");
        }
        report = supervisor.join_next() => {
            tracing::warn!(?report, "a core task ended early; shutting down");
        }
    }

    cancel.cancel();
    scheduler.stop().await;
    let reports = supervisor.join_all().await;
    let failed = reports.iter().filter(|r| r.is_failure()).count();
    tracing::info!(tasks = reports.len(), failed, "modbot stopped");
    Ok(())
}
