use anyhow::Context;
use ns_cluster::{Coordinator, CoordinatorSettings};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let path = std::env::var("NS_CONFIG").unwrap_or_else(|_| "ns-search.json".to_string());
    let mut settings = CoordinatorSettings::from_file(&path)
        .with_context(|| format!("loading settings from {path}"))?;
    settings.apply_overrides(|key| std::env::var(key).ok())?;

    let mut controller = settings.controller.build(settings.range_table.clone())?;
    let init_var = match settings.init_var.clone() {
        Some(var) => var,
        None => controller.generate_init_var(),
    };

    let mut coordinator = Coordinator::new(settings.coordinator.clone())?;
    coordinator.start()?;
    let result = coordinator.run(
        &mut *controller,
        settings.max_iterations,
        init_var,
        settings.init_reward,
    );
    coordinator.close();

    let result = result.context("search run aborted")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
