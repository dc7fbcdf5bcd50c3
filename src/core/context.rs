//! Run context - trigger data and variables for one pipeline run

use crate::core::trigger::TriggerEvent;
use std::collections::HashMap;
use uuid::Uuid;

/// Execution context for a pipeline run
///
/// Carries the trigger event, the merged variable set, and the image tag
/// used by build and deploy stages.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// The event that started the run
    pub event: TriggerEvent,

    /// Global and user-supplied variables
    pub variables: HashMap<String, String>,

    /// Tag applied to built images and referenced by deploy descriptors
    pub image_tag: String,

    /// Run ID, shared with the pipeline state
    pub run_id: Uuid,
}

impl RunContext {
    pub fn new(
        event: TriggerEvent,
        variables: HashMap<String, String>,
        image_tag: String,
        run_id: Uuid,
    ) -> Self {
        Self {
            event,
            variables,
            image_tag,
            run_id,
        }
    }

    /// Set a variable (CLI overrides)
    pub fn set_variable(&mut self, key: String, value: String) {
        self.variables.insert(key, value);
    }

    /// Render a template with `{{ variable }}` substitution. Built-ins:
    /// `event`, `branch`, `tag`, `run_id`.
    pub fn render(&self, template: &str) -> String {
        let mut rendered = template.to_string();

        for (key, value) in &self.variables {
            let placeholder = format!("{{{{ {} }}}}", key);
            rendered = rendered.replace(&placeholder, value);
        }

        rendered = rendered.replace("{{ event }}", &self.event.kind.to_string());
        rendered = rendered.replace("{{ branch }}", self.event.branch.as_deref().unwrap_or(""));
        rendered = rendered.replace("{{ tag }}", &self.image_tag);
        rendered = rendered.replace("{{ run_id }}", &self.run_id.to_string());

        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RunContext {
        let mut variables = HashMap::new();
        variables.insert("image".to_string(), "registry.example.com/webapp".to_string());

        RunContext::new(
            TriggerEvent::push("main"),
            variables,
            "v42".to_string(),
            Uuid::new_v4(),
        )
    }

    #[test]
    fn test_render_variables() {
        let ctx = context();
        assert_eq!(
            ctx.render("docker pull {{ image }}:{{ tag }}"),
            "docker pull registry.example.com/webapp:v42"
        );
    }

    #[test]
    fn test_render_builtins() {
        let ctx = context();
        assert_eq!(ctx.render("{{ event }} on {{ branch }}"), "push on main");
    }

    #[test]
    fn test_unknown_placeholder_left_alone() {
        let ctx = context();
        assert_eq!(ctx.render("{{ nope }}"), "{{ nope }}");
    }
}
