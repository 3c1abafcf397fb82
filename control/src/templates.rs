//! Static template catalog.

/// Base image and service port for one workspace template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateConfig {
    pub base_image: &'static str,
    pub port: i32,
}

const CATALOG: &[(&str, TemplateConfig)] = &[
    (
        "node",
        TemplateConfig {
            base_image: "node:20-slim",
            port: 8081,
        },
    ),
    (
        "python",
        TemplateConfig {
            base_image: "python:3.11-slim",
            port: 8081,
        },
    ),
    (
        "go",
        TemplateConfig {
            base_image: "golang:1.24-alpine",
            port: 8081,
        },
    ),
];

pub fn get(name: &str) -> Option<TemplateConfig> {
    CATALOG
        .iter()
        .find(|(template, _)| *template == name)
        .map(|(_, config)| *config)
}

/// Runner image for a template, as deployed to the cluster.
pub fn runner_image(template: &str) -> String {
    format!("runner-{template}:latest")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_templates_resolve() {
        assert_eq!(get("node").unwrap().port, 8081);
        assert_eq!(get("python").unwrap().base_image, "python:3.11-slim");
        assert!(get("ruby").is_none());
    }

    #[test]
    fn runner_image_is_derived_from_template() {
        assert_eq!(runner_image("node"), "runner-node:latest");
    }
}
