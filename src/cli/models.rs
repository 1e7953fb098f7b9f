use crate::config::RelayConfig;

/// Execute the `models` command: list configured models.
pub fn execute(config: &RelayConfig) {
    if config.models.is_empty() {
        println!("No models configured.");
        return;
    }

    println!("{:<30} {:<10} UPSTREAM", "ID", "PROVIDER");
    for model in &config.models {
        let upstream = match (&model.base_url, &model.upstream_model) {
            (Some(url), Some(name)) => format!("{name} @ {url}"),
            (Some(url), None) => format!("{} @ {url}", model.id),
            _ => "-".to_string(),
        };
        println!("{:<30} {:<10} {}", model.id, model.provider.to_string(), upstream);
    }
}
