use serde::{Deserialize, Serialize};

use super::models::ListingKind;

/// Bumped whenever the shape of a kind's field set changes.
pub const REGISTRY_VERSION: u32 = 1;

/// One way of finding a field on the live page. Candidates are tried
/// strictly in the order they appear in [`FieldDescriptor::strategies`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Exact stable-attribute selector.
    Css(String),
    /// Visible `<label>` text associated with the control.
    LabelText(String),
    /// Accessibility role plus accessible name.
    Role { role: String, name: String },
    /// First form control following a known landmark element.
    NearLandmark { landmark: String },
}

/// How a value is applied to the resolved element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Select,
}

/// Normalizer applied both when typing a value and when comparing the
/// post-fill readback against the intended value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    Text,
    Trimmed,
    Numeric,
    Currency,
}

impl ValueFormat {
    pub fn normalize(&self, raw: &str) -> String {
        match self {
            ValueFormat::Text => raw.to_string(),
            ValueFormat::Trimmed => raw.trim().to_string(),
            ValueFormat::Numeric => raw.chars().filter(|c| c.is_ascii_digit()).collect(),
            ValueFormat::Currency => {
                // Keep digits and at most one decimal point; "$25,000.00"
                // and "25000" normalize to the same value.
                let mut out = String::new();
                let mut seen_point = false;
                for c in raw.chars() {
                    if c.is_ascii_digit() {
                        out.push(c);
                    } else if c == '.' && !seen_point {
                        seen_point = true;
                        out.push(c);
                    }
                }
                if seen_point {
                    out.trim_end_matches('0').trim_end_matches('.').to_string()
                } else {
                    out
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub key: String,
    pub strategies: Vec<ResolutionStrategy>,
    pub required: bool,
    pub format: ValueFormat,
    pub input: InputKind,
}

impl FieldDescriptor {
    fn text(key: &str, required: bool, format: ValueFormat) -> Self {
        Self {
            key: key.to_string(),
            strategies: Vec::new(),
            required,
            format,
            input: InputKind::Text,
        }
    }

    fn select(key: &str) -> Self {
        Self {
            key: key.to_string(),
            strategies: Vec::new(),
            required: false,
            format: ValueFormat::Trimmed,
            input: InputKind::Select,
        }
    }

    fn with_strategies(mut self, strategies: Vec<ResolutionStrategy>) -> Self {
        self.strategies = strategies;
        self
    }
}

/// Closed, versioned set of fields one listing kind can carry. Requests are
/// validated against it before any plan is derived.
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    pub version: u32,
    pub kind: ListingKind,
    fields: Vec<FieldDescriptor>,
    upload: FieldDescriptor,
    review_panel: FieldDescriptor,
    stage_button: FieldDescriptor,
}

impl FieldRegistry {
    pub fn for_kind(kind: ListingKind) -> Self {
        let mut fields = vec![title_descriptor(), description_descriptor()];
        match kind {
            ListingKind::Item => fields.extend(item_fields()),
            ListingKind::Property => fields.extend(property_fields()),
        }
        Self {
            version: REGISTRY_VERSION,
            kind,
            fields,
            upload: upload_descriptor(),
            review_panel: review_panel_descriptor(),
            stage_button: stage_button_descriptor(),
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn descriptor(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.descriptor(key).is_some()
    }

    pub fn upload_target(&self) -> &FieldDescriptor {
        &self.upload
    }

    pub fn review_panel(&self) -> &FieldDescriptor {
        &self.review_panel
    }

    pub fn stage_button(&self) -> &FieldDescriptor {
        &self.stage_button
    }
}

fn title_descriptor() -> FieldDescriptor {
    FieldDescriptor::text("titulo", true, ValueFormat::Trimmed).with_strategies(vec![
        ResolutionStrategy::Css("input[aria-label='Título']".to_string()),
        ResolutionStrategy::LabelText("Título".to_string()),
        ResolutionStrategy::Role {
            role: "textbox".to_string(),
            name: "Título".to_string(),
        },
        ResolutionStrategy::NearLandmark {
            landmark: "div[aria-label='Publicación en Marketplace']".to_string(),
        },
    ])
}

fn description_descriptor() -> FieldDescriptor {
    FieldDescriptor::text("descripcion", true, ValueFormat::Trimmed).with_strategies(vec![
        ResolutionStrategy::Css("textarea[aria-label='Descripción']".to_string()),
        ResolutionStrategy::LabelText("Descripción".to_string()),
        ResolutionStrategy::Role {
            role: "textbox".to_string(),
            name: "Descripción".to_string(),
        },
    ])
}

fn item_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::text("precio", false, ValueFormat::Currency).with_strategies(vec![
            ResolutionStrategy::Css("input[aria-label='Precio']".to_string()),
            ResolutionStrategy::LabelText("Precio".to_string()),
            ResolutionStrategy::Role {
                role: "textbox".to_string(),
                name: "Precio".to_string(),
            },
        ]),
        FieldDescriptor::select("categoria").with_strategies(vec![
            ResolutionStrategy::Css("div[aria-label='Categoría'] select".to_string()),
            ResolutionStrategy::LabelText("Categoría".to_string()),
            ResolutionStrategy::Role {
                role: "combobox".to_string(),
                name: "Categoría".to_string(),
            },
        ]),
        FieldDescriptor::select("estado").with_strategies(vec![
            ResolutionStrategy::Css("div[aria-label='Estado'] select".to_string()),
            ResolutionStrategy::LabelText("Estado".to_string()),
            ResolutionStrategy::Role {
                role: "combobox".to_string(),
                name: "Estado".to_string(),
            },
        ]),
        FieldDescriptor::text("ubicacion", false, ValueFormat::Trimmed).with_strategies(vec![
            ResolutionStrategy::Css("input[aria-label='Ubicación']".to_string()),
            ResolutionStrategy::LabelText("Ubicación".to_string()),
        ]),
    ]
}

fn property_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::text("precio", false, ValueFormat::Currency).with_strategies(vec![
            ResolutionStrategy::Css("input[aria-label='Precio']".to_string()),
            ResolutionStrategy::LabelText("Precio".to_string()),
            ResolutionStrategy::Role {
                role: "textbox".to_string(),
                name: "Precio".to_string(),
            },
        ]),
        FieldDescriptor::select("tipo_inmueble").with_strategies(vec![
            ResolutionStrategy::Css("div[aria-label='Tipo de propiedad'] select".to_string()),
            ResolutionStrategy::LabelText("Tipo de propiedad".to_string()),
            ResolutionStrategy::Role {
                role: "combobox".to_string(),
                name: "Tipo de propiedad".to_string(),
            },
        ]),
        FieldDescriptor::text("recamaras", false, ValueFormat::Numeric).with_strategies(vec![
            ResolutionStrategy::Css("input[aria-label='Recámaras']".to_string()),
            ResolutionStrategy::LabelText("Recámaras".to_string()),
        ]),
        FieldDescriptor::text("banos", false, ValueFormat::Numeric).with_strategies(vec![
            ResolutionStrategy::Css("input[aria-label='Baños']".to_string()),
            ResolutionStrategy::LabelText("Baños".to_string()),
        ]),
        FieldDescriptor::text("ubicacion", false, ValueFormat::Trimmed).with_strategies(vec![
            ResolutionStrategy::Css("input[aria-label='Ubicación']".to_string()),
            ResolutionStrategy::LabelText("Ubicación".to_string()),
        ]),
    ]
}

fn upload_descriptor() -> FieldDescriptor {
    FieldDescriptor {
        key: "fotos".to_string(),
        strategies: vec![
            ResolutionStrategy::Css("input[type='file'][accept*='image']".to_string()),
            ResolutionStrategy::Css("input[type='file']".to_string()),
            ResolutionStrategy::LabelText("Agregar fotos".to_string()),
        ],
        required: false,
        format: ValueFormat::Text,
        input: InputKind::Text,
    }
}

fn review_panel_descriptor() -> FieldDescriptor {
    FieldDescriptor {
        key: "vista_previa".to_string(),
        strategies: vec![
            ResolutionStrategy::Css("div[aria-label='Vista previa']".to_string()),
            ResolutionStrategy::Role {
                role: "region".to_string(),
                name: "Vista previa".to_string(),
            },
        ],
        required: true,
        format: ValueFormat::Text,
        input: InputKind::Text,
    }
}

fn stage_button_descriptor() -> FieldDescriptor {
    FieldDescriptor {
        key: "guardar_borrador".to_string(),
        strategies: vec![
            ResolutionStrategy::Css("div[aria-label='Guardar borrador']".to_string()),
            ResolutionStrategy::Role {
                role: "button".to_string(),
                name: "Guardar borrador".to_string(),
            },
            ResolutionStrategy::LabelText("Guardar borrador".to_string()),
        ],
        required: true,
        format: ValueFormat::Text,
        input: InputKind::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registries_are_closed_per_kind() {
        let item = FieldRegistry::for_kind(ListingKind::Item);
        let property = FieldRegistry::for_kind(ListingKind::Property);
        assert!(item.contains("categoria"));
        assert!(!item.contains("recamaras"));
        assert!(property.contains("recamaras"));
        assert!(!property.contains("categoria"));
        assert_eq!(item.version, REGISTRY_VERSION);
    }

    #[test]
    fn strategies_keep_declaration_order() {
        let registry = FieldRegistry::for_kind(ListingKind::Property);
        let title = registry.descriptor("titulo").unwrap();
        assert!(matches!(title.strategies[0], ResolutionStrategy::Css(_)));
        assert!(matches!(
            title.strategies[1],
            ResolutionStrategy::LabelText(_)
        ));
    }

    #[test]
    fn currency_normalization_collapses_formatting() {
        let format = ValueFormat::Currency;
        assert_eq!(format.normalize("$25,000.00"), "25000");
        assert_eq!(format.normalize("25000"), "25000");
        assert_eq!(format.normalize("1,250.50"), "1250.5");
    }

    #[test]
    fn numeric_normalization_strips_non_digits() {
        assert_eq!(ValueFormat::Numeric.normalize(" 3 recámaras"), "3");
    }
}
