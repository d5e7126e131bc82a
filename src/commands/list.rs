use crate::catalog::VersionCatalog;
use crate::error::Result;
use crate::hardware::HardwareClass;

use super::http_client;

/// Print known versions, newest hardware first
pub async fn list(hardware: Option<HardwareClass>) -> Result<()> {
    let client = http_client()?;
    let catalog = VersionCatalog::open(&client).await?;
    println!("{}", render(&catalog, hardware));
    Ok(())
}

fn render(catalog: &VersionCatalog, hardware: Option<HardwareClass>) -> String {
    let classes: Vec<HardwareClass> = match hardware {
        Some(hardware) => vec![hardware],
        None => HardwareClass::ALL.to_vec(),
    };

    classes
        .into_iter()
        .map(|hardware| {
            let mut section = format!("{}:", hardware);
            for version in catalog.versions(hardware) {
                section.push('\n');
                section.push_str(version);
            }
            section
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::catalog;
    use tempfile::TempDir;

    #[test]
    fn test_render_single_hardware() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir, serde_json::json!({}));
        assert_eq!(
            render(&catalog, Some(HardwareClass::Rm2)),
            "reMarkable 2:\n2.15.1.1189\n3.11.2.5"
        );
    }

    #[test]
    fn test_render_all_sections() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir, serde_json::json!({}));
        let output = render(&catalog, None);
        assert!(output.starts_with("reMarkable Paper Pro:"));
        assert!(output.contains("\n\nreMarkable 2:\n2.15.1.1189"));
        assert!(output.ends_with("reMarkable 1:"));
    }
}
