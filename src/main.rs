use std::{process, sync::Arc};

use cms_cache::{
    application::{content::ContentService, error::AppError},
    cache::{
        CacheConfig, CacheEntry, CacheStore, EntityId, FetchExecutor, KeyParams, Payload, Record,
        ResourceKey,
    },
    config::{self, BodyArgs, Command, QueryArgs, WatchArgs, WatchView},
    domain::families,
    infra::{error::InfraError, http::RestTransport, telemetry},
};
use serde_json::Value;
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let transport = Arc::new(RestTransport::from_settings(&settings.api)?);
    let store = Arc::new(CacheStore::new(Arc::new(families::registry())));
    let options = CacheConfig::from(&settings.cache).fetch_options();
    let service = ContentService::new(transport, FetchExecutor::new(store), options);

    let result = dispatch(&service, cli_args.command).await;

    service.shutdown();
    result
}

async fn dispatch(service: &ContentService, command: Command) -> Result<(), AppError> {
    match command {
        Command::List(args) => {
            let key = service.list_key(&args.family, query_params(&args.query))?;
            show(service, &key).await
        }
        Command::Featured(args) => {
            let key = service.featured_key(&args.family)?;
            show(service, &key).await
        }
        Command::Categories(args) => {
            let key = service.categories_key(&args.family)?;
            show(service, &key).await
        }
        Command::Get(args) => {
            let key = service.detail_key(&args.family, EntityId::from(args.id))?;
            show(service, &key).await
        }
        Command::Create(args) => {
            let body = read_body(&args.body).await?;
            let written = service.create(&args.family, body).await?;
            print_written(written)
        }
        Command::Update(args) => {
            let body = read_body(&args.body).await?;
            let written = service
                .update(&args.family, EntityId::from(args.id), body)
                .await?;
            print_written(written)
        }
        Command::Delete(args) => {
            service
                .delete(&args.family, EntityId::from(args.id.as_str()))
                .await?;
            info!(family = %args.family, id = %args.id, "Deleted");
            Ok(())
        }
        Command::Watch(args) => watch(service, args).await,
    }
}

async fn show(service: &ContentService, key: &ResourceKey) -> Result<(), AppError> {
    let entry = service.load(key).await?;
    if let Some(error) = entry.error.clone() {
        return Err(AppError::Fetch {
            key: key.to_string(),
            error,
        });
    }
    print_entry(&entry)
}

async fn watch(service: &ContentService, args: WatchArgs) -> Result<(), AppError> {
    let key = match args.view {
        WatchView::List => service.list_key(&args.family, query_params(&args.query))?,
        WatchView::Featured => service.featured_key(&args.family)?,
        WatchView::Categories => service.categories_key(&args.family)?,
        WatchView::Detail => {
            let id = args
                .id
                .as_deref()
                .ok_or_else(|| AppError::validation("--id is required for the detail view"))?;
            service.detail_key(&args.family, EntityId::from(id))?
        }
    };

    let mut subscription = service.subscribe(&key)?;
    info!(key = %key, "Watching for changes; press Ctrl-C to stop");

    loop {
        tokio::select! {
            changed = subscription.next() => match changed {
                Some(entry) if entry.is_loading() => debug!(key = %key, "Loading"),
                Some(entry) => match entry.error.as_ref() {
                    Some(error) => {
                        warn!(key = %key, error = %error, "Refresh failed; keeping previous data");
                    }
                    None => print_entry(&entry)?,
                },
                // Nothing else removes a watched key, so an authentication
                // failure reset the session.
                None => {
                    return Err(AppError::SessionEnded {
                        key: key.to_string(),
                    });
                }
            },
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(InfraError::from)?;
                return Ok(());
            }
        }
    }
}

fn query_params(query: &QueryArgs) -> KeyParams {
    let mut params = KeyParams::new()
        .with_opt("page", query.page)
        .with_opt("per_page", query.per_page);
    for (name, value) in &query.params {
        params.insert(name.as_str(), value.as_str());
    }
    params
}

async fn read_body(body: &BodyArgs) -> Result<Value, AppError> {
    let raw = match (body.data.as_ref(), body.file.as_ref()) {
        (Some(data), _) => data.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .map_err(InfraError::from)?,
        (None, None) => {
            return Err(AppError::validation(
                "a JSON body is required; pass --data or --file",
            ));
        }
    };
    let value: Value = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("body is not valid JSON: {err}")))?;
    if !value.is_object() {
        return Err(AppError::validation("body must be a JSON object"));
    }
    Ok(value)
}

fn print_entry(entry: &CacheEntry) -> Result<(), AppError> {
    let body = entry.payload().map(Payload::to_json).unwrap_or(Value::Null);
    print_json(&body)
}

fn print_written(written: Option<Record>) -> Result<(), AppError> {
    print_json(&written.map(Value::Object).unwrap_or(Value::Null))
}

fn print_json(value: &Value) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::validation(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
