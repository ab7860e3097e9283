use crate::error::{DispatchError, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub const CUSTOMER_PLACEHOLDER: &str = "{customer_name}";
pub const DEFAULT_FALLBACK_TEMPLATE: &str = "Hello {customer_name}, your order was updated!";

const DEFAULT_OPENING: &str = "Hello, {customer_name}!";
const GENERIC_BODY: &str = "Your order was updated.";
const DEFAULT_CLOSING: &str = "😉";
/// Body pool used for status keys the matrix does not list, when present.
const GENERIC_BODY_KEY: &str = "default";

/// Interchangeable message fragments, read once from a JSON file.
///
/// Pools absent from the file fall back to built-in defaults. A pool that is
/// present but empty makes composition fall back to the fixed template.
#[derive(Debug, Clone, Deserialize)]
pub struct PhraseMatrix {
    #[serde(default = "default_openings", alias = "saudacoes")]
    openings: Vec<String>,
    #[serde(default, alias = "corpos")]
    bodies: HashMap<String, Vec<String>>,
    #[serde(default = "default_closings", alias = "fechamentos")]
    closings: Vec<String>,
}

fn default_openings() -> Vec<String> {
    vec![DEFAULT_OPENING.to_string()]
}

fn default_closings() -> Vec<String> {
    vec![DEFAULT_CLOSING.to_string()]
}

impl PhraseMatrix {
    pub fn new(
        openings: Vec<String>,
        bodies: HashMap<String, Vec<String>>,
        closings: Vec<String>,
    ) -> Self {
        Self {
            openings,
            bodies,
            closings,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| DispatchError::PhraseMatrix {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&contents).map_err(|e| match e {
            DispatchError::PhraseMatrix { reason, .. } => DispatchError::PhraseMatrix {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| DispatchError::PhraseMatrix {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn status_keys(&self) -> impl Iterator<Item = &str> {
        self.bodies.keys().map(String::as_str)
    }

    fn body_pool(&self, status_key: &str) -> Option<&[String]> {
        self.bodies
            .get(status_key)
            .or_else(|| self.bodies.get(GENERIC_BODY_KEY))
            .map(Vec::as_slice)
    }
}

/// Builds outbound message text. Pure apart from the random fragment choice.
#[derive(Debug, Clone)]
pub struct Composer {
    matrix: Option<PhraseMatrix>,
    fallback_template: String,
}

impl Composer {
    pub fn new(matrix: Option<PhraseMatrix>, fallback_template: impl Into<String>) -> Self {
        let fallback_template = fallback_template.into();
        let fallback_template = if fallback_template.trim().is_empty() {
            DEFAULT_FALLBACK_TEMPLATE.to_string()
        } else {
            fallback_template
        };
        Self {
            matrix,
            fallback_template,
        }
    }

    /// Loads the matrix at `path` if any. A missing or broken file is logged
    /// and leaves the composer on the fixed template.
    pub fn from_path(path: Option<&Path>, fallback_template: impl Into<String>) -> Self {
        let matrix = match path {
            None => None,
            Some(path) => match PhraseMatrix::load(path) {
                Ok(matrix) => {
                    tracing::info!(
                        path = %path.display(),
                        status_keys = matrix.bodies.len(),
                        "phrase matrix loaded"
                    );
                    Some(matrix)
                }
                Err(error) => {
                    tracing::warn!(%error, "phrase matrix unavailable; using fallback template");
                    None
                }
            },
        };
        Self::new(matrix, fallback_template)
    }

    pub fn matrix(&self) -> Option<&PhraseMatrix> {
        self.matrix.as_ref()
    }

    pub fn compose(&self, status_key: &str, customer_name: &str) -> String {
        self.compose_with_rng(status_key, customer_name, &mut rand::thread_rng())
    }

    pub fn compose_with_rng<R: Rng + ?Sized>(
        &self,
        status_key: &str,
        customer_name: &str,
        rng: &mut R,
    ) -> String {
        self.compose_from_matrix(status_key, customer_name, rng)
            .unwrap_or_else(|| self.fallback(customer_name))
    }

    pub fn fallback(&self, customer_name: &str) -> String {
        self.fallback_template
            .replace(CUSTOMER_PLACEHOLDER, customer_name)
    }

    fn compose_from_matrix<R: Rng + ?Sized>(
        &self,
        status_key: &str,
        customer_name: &str,
        rng: &mut R,
    ) -> Option<String> {
        let matrix = self.matrix.as_ref()?;
        let opening = matrix.openings.choose(rng)?;
        let body = match matrix.body_pool(status_key) {
            Some(pool) => pool.choose(rng)?.as_str(),
            None => GENERIC_BODY,
        };
        let closing = matrix.closings.choose(rng)?;

        let template = [opening.as_str(), body, closing.as_str()]
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if template.is_empty() {
            return None;
        }
        if template.contains(CUSTOMER_PLACEHOLDER) {
            return Some(template.replace(CUSTOMER_PLACEHOLDER, customer_name));
        }
        Some(format!("{customer_name}, {template}"))
    }
}

#[cfg(test)]
mod tests {
    use super::{Composer, DEFAULT_FALLBACK_TEMPLATE, PhraseMatrix};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;
    use std::io::Write;

    fn matrix_with_body(status: &str, body: &str) -> PhraseMatrix {
        PhraseMatrix::new(
            vec!["Hi {customer_name}!".to_string()],
            HashMap::from([(status.to_string(), vec![body.to_string()])]),
            vec!["See you soon.".to_string()],
        )
    }

    #[test]
    fn matrix_message_contains_name_and_status_body() {
        let composer = Composer::new(
            Some(matrix_with_body("saiu_entrega", "Order shipped!")),
            DEFAULT_FALLBACK_TEMPLATE,
        );
        let message = composer.compose("saiu_entrega", "Maria");
        assert!(message.contains("Maria"), "{message}");
        assert!(message.contains("Order shipped!"), "{message}");
        assert_eq!(message, "Hi Maria! Order shipped! See you soon.");
    }

    #[test]
    fn unknown_status_uses_generic_body() {
        let composer = Composer::new(
            Some(matrix_with_body("aceito", "Accepted.")),
            DEFAULT_FALLBACK_TEMPLATE,
        );
        let message = composer.compose("cancelado", "Ana");
        assert_eq!(message, "Hi Ana! Your order was updated. See you soon.");
    }

    #[test]
    fn default_body_key_covers_unknown_status() {
        let mut matrix = matrix_with_body("aceito", "Accepted.");
        matrix
            .bodies
            .insert("default".to_string(), vec!["Status changed.".to_string()]);
        let composer = Composer::new(Some(matrix), DEFAULT_FALLBACK_TEMPLATE);
        assert_eq!(
            composer.compose("cancelado", "Ana"),
            "Hi Ana! Status changed. See you soon."
        );
    }

    #[test]
    fn missing_matrix_uses_fixed_template() {
        let composer = Composer::new(None, DEFAULT_FALLBACK_TEMPLATE);
        assert_eq!(
            composer.compose("saiu_entrega", "Maria"),
            "Hello Maria, your order was updated!"
        );
    }

    #[test]
    fn empty_pool_falls_back_to_fixed_template() {
        let matrix = PhraseMatrix::new(
            Vec::new(),
            HashMap::from([("aceito".to_string(), vec!["Accepted.".to_string()])]),
            vec!["Bye.".to_string()],
        );
        let composer = Composer::new(Some(matrix), "Olá {customer_name}, seu pedido foi atualizado!");
        assert_eq!(
            composer.compose("aceito", "João"),
            "Olá João, seu pedido foi atualizado!"
        );
    }

    #[test]
    fn empty_status_pool_falls_back_to_fixed_template() {
        let matrix = PhraseMatrix::new(
            vec!["Hi {customer_name}!".to_string()],
            HashMap::from([("aceito".to_string(), Vec::new())]),
            vec!["Bye.".to_string()],
        );
        let composer = Composer::new(Some(matrix), DEFAULT_FALLBACK_TEMPLATE);
        assert_eq!(
            composer.compose("aceito", "Ana"),
            "Hello Ana, your order was updated!"
        );
    }

    #[test]
    fn blank_fallback_template_is_replaced_with_default() {
        let composer = Composer::new(None, "   ");
        assert_eq!(composer.fallback("Ana"), "Hello Ana, your order was updated!");
    }

    #[test]
    fn name_is_prepended_when_fragments_have_no_placeholder() {
        let matrix = PhraseMatrix::new(
            vec!["Good news!".to_string()],
            HashMap::from([("pronto".to_string(), vec!["It is ready.".to_string()])]),
            vec!["Thanks.".to_string()],
        );
        let composer = Composer::new(Some(matrix), DEFAULT_FALLBACK_TEMPLATE);
        assert_eq!(
            composer.compose("pronto", "Rui"),
            "Rui, Good news! It is ready. Thanks."
        );
    }

    #[test]
    fn compose_is_total_over_arbitrary_inputs() {
        let composer = Composer::new(
            Some(matrix_with_body("aceito", "Accepted.")),
            DEFAULT_FALLBACK_TEMPLATE,
        );
        let mut rng = StdRng::seed_from_u64(7);
        for status in ["", "aceito", "??", "saiu_entrega"] {
            for name in ["", "Maria", "José da Silva"] {
                let message = composer.compose_with_rng(status, name, &mut rng);
                assert!(!message.is_empty());
                assert!(message.contains(name));
            }
        }
    }

    #[test]
    fn random_choice_draws_from_each_pool() {
        let matrix = PhraseMatrix::new(
            vec!["A {customer_name}".to_string(), "B {customer_name}".to_string()],
            HashMap::from([(
                "aceito".to_string(),
                vec!["one".to_string(), "two".to_string()],
            )]),
            vec!["x".to_string(), "y".to_string()],
        );
        let composer = Composer::new(Some(matrix), DEFAULT_FALLBACK_TEMPLATE);
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(composer.compose_with_rng("aceito", "Eva", &mut rng));
        }
        assert_eq!(seen.len(), 8, "{seen:?}");
    }

    #[test]
    fn legacy_pool_keys_are_accepted() {
        let matrix = PhraseMatrix::from_json(
            r#"{
                "saudacoes": ["Olá, {customer_name}!"],
                "corpos": { "saiu_entrega": ["Seu pedido saiu para entrega."] },
                "fechamentos": ["Até logo!"]
            }"#,
        )
        .expect("legacy matrix parses");
        let composer = Composer::new(Some(matrix), DEFAULT_FALLBACK_TEMPLATE);
        assert_eq!(
            composer.compose("saiu_entrega", "Maria"),
            "Olá, Maria! Seu pedido saiu para entrega. Até logo!"
        );
    }

    #[test]
    fn absent_pools_use_builtin_defaults() {
        let matrix = PhraseMatrix::from_json(r#"{ "bodies": { "pronto": ["Ready."] } }"#)
            .expect("partial matrix parses");
        let composer = Composer::new(Some(matrix), DEFAULT_FALLBACK_TEMPLATE);
        assert_eq!(composer.compose("pronto", "Lia"), "Hello, Lia! Ready. 😉");
    }

    #[test]
    fn from_path_loads_file_and_tolerates_missing_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{ "openings": ["Hey {{customer_name}}"], "bodies": {{}}, "closings": ["!"] }}"#
        )
        .expect("write matrix");
        let composer = Composer::from_path(Some(file.path()), DEFAULT_FALLBACK_TEMPLATE);
        assert!(composer.matrix().is_some());
        assert_eq!(
            composer.compose("aceito", "Bo"),
            "Hey Bo Your order was updated. !"
        );

        let missing = file.path().with_extension("missing");
        let composer = Composer::from_path(Some(&missing), DEFAULT_FALLBACK_TEMPLATE);
        assert!(composer.matrix().is_none());
        assert_eq!(composer.compose("aceito", "Bo"), "Hello Bo, your order was updated!");
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "not json").expect("write");
        let err = PhraseMatrix::load(file.path()).expect_err("malformed json");
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
