//! `tutorchat models`

use crate::core::builtin_models::ModelCatalog;
use crate::core::config::Config;

pub fn list_models(catalog: &ModelCatalog, config: &Config) {
    let default_model = config
        .default_model
        .as_deref()
        .and_then(|id| catalog.resolve(id).ok())
        .unwrap_or_else(|| catalog.default_text_model().clone());

    println!("🤖 Available Models");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    for line in model_lines(catalog, default_model.as_str()) {
        println!("{line}");
    }
    println!();
    println!(
        "Images are always answered by {}; text turns on that model go back to {}.",
        catalog.vision_model(),
        catalog.default_text_model()
    );
}

fn model_lines(catalog: &ModelCatalog, default_model: &str) -> Vec<String> {
    catalog
        .providers()
        .iter()
        .flat_map(|provider| {
            let mut lines = vec![format!("{} ({})", provider.display_name, provider.id)];
            lines.extend(
                catalog
                    .models()
                    .iter()
                    .filter(|model| model.provider == provider.id)
                    .map(|model| {
                        let mut tags = Vec::new();
                        if model.id == default_model {
                            tags.push("default");
                        }
                        if model.vision {
                            tags.push("vision");
                        }
                        let tags = if tags.is_empty() {
                            String::new()
                        } else {
                            format!(" [{}]", tags.join(", "))
                        };
                        format!("  • {}{tags}  {}", model.id, model.description)
                    }),
            );
            lines
        })
        .collect()
}
