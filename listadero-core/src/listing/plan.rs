use std::path::PathBuf;

use crate::config::LimitsSection;

use super::models::{ListingError, ListingKind, ListingRequest};
use super::registry::{FieldDescriptor, FieldRegistry, InputKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Click,
    Type,
    Select,
    Upload,
    Wait,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub action: StepAction,
    pub target: FieldDescriptor,
    pub value: Option<String>,
}

/// Immutable, derived once from a validated [`ListingRequest`]. Field steps
/// come first (registry order), then the upload step, then the review pause
/// and the draft-staging click. Nothing in a plan publishes.
#[derive(Debug, Clone)]
pub struct InteractionPlan {
    pub kind: ListingKind,
    pub form_url: String,
    pub steps: Vec<Step>,
    pub images: Vec<PathBuf>,
    pub dropped_images: usize,
}

impl InteractionPlan {
    pub fn build(
        request: &ListingRequest,
        registry: &FieldRegistry,
        limits: &LimitsSection,
        form_url: impl Into<String>,
    ) -> Result<Self, ListingError> {
        if request.title.trim().is_empty() {
            return Err(ListingError::EmptyTitle);
        }
        if request.description.trim().is_empty() {
            return Err(ListingError::EmptyDescription);
        }
        for key in request.fields.keys() {
            if !registry.contains(key) {
                return Err(ListingError::UnknownField {
                    key: key.clone(),
                    kind: request.kind,
                });
            }
        }

        let mut steps = Vec::new();
        for field in registry.fields() {
            let value = match field.key.as_str() {
                "titulo" => Some(request.title.clone()),
                "descripcion" => Some(request.description.clone()),
                key => request.fields.get(key).cloned(),
            };
            let Some(value) = value else { continue };
            let action = match field.input {
                InputKind::Text => StepAction::Type,
                InputKind::Select => StepAction::Select,
            };
            steps.push(Step {
                action,
                target: field.clone(),
                value: Some(value),
            });
        }

        let cap = match request.kind {
            ListingKind::Item => limits.max_images_item,
            ListingKind::Property => limits.max_images_property,
        };
        let images: Vec<PathBuf> = request.images.iter().take(cap).cloned().collect();
        let dropped_images = request.images.len().saturating_sub(cap);

        if !images.is_empty() {
            steps.push(Step {
                action: StepAction::Upload,
                target: registry.upload_target().clone(),
                value: None,
            });
        }
        steps.push(Step {
            action: StepAction::Wait,
            target: registry.review_panel().clone(),
            value: None,
        });
        steps.push(Step {
            action: StepAction::Click,
            target: registry.stage_button().clone(),
            value: None,
        });

        Ok(Self {
            kind: request.kind,
            form_url: form_url.into(),
            steps,
            images,
            dropped_images,
        })
    }

    /// Indices of the value-carrying fill steps, in plan order.
    pub fn fill_steps(&self) -> impl Iterator<Item = (usize, &Step)> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| matches!(step.action, StepAction::Type | StepAction::Select))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::registry::FieldRegistry;

    fn limits() -> LimitsSection {
        LimitsSection::default()
    }

    #[test]
    fn empty_title_never_yields_a_plan() {
        let request = ListingRequest::new(ListingKind::Item, "  ", "algo");
        let registry = FieldRegistry::for_kind(ListingKind::Item);
        let err = InteractionPlan::build(&request, &registry, &limits(), "https://x/form");
        assert_eq!(err.unwrap_err(), ListingError::EmptyTitle);
    }

    #[test]
    fn empty_description_never_yields_a_plan() {
        let request = ListingRequest::new(ListingKind::Property, "Casa", "");
        let registry = FieldRegistry::for_kind(ListingKind::Property);
        let err = InteractionPlan::build(&request, &registry, &limits(), "https://x/form");
        assert_eq!(err.unwrap_err(), ListingError::EmptyDescription);
    }

    #[test]
    fn unknown_field_is_rejected_before_any_step_exists() {
        let request = ListingRequest::new(ListingKind::Item, "Silla", "De madera")
            .with_field("recamaras", "3");
        let registry = FieldRegistry::for_kind(ListingKind::Item);
        let err = InteractionPlan::build(&request, &registry, &limits(), "https://x/form");
        assert!(matches!(
            err.unwrap_err(),
            ListingError::UnknownField { .. }
        ));
    }

    #[test]
    fn image_surplus_keeps_first_cap_in_order() {
        let images: Vec<PathBuf> = (0..15).map(|i| PathBuf::from(format!("img_{i:02}.jpg"))).collect();
        let request = ListingRequest::new(ListingKind::Item, "Silla", "De madera")
            .with_images(images.clone());
        let registry = FieldRegistry::for_kind(ListingKind::Item);
        let plan =
            InteractionPlan::build(&request, &registry, &limits(), "https://x/form").unwrap();
        assert_eq!(plan.images.len(), 10);
        assert_eq!(plan.images, images[..10].to_vec());
        assert_eq!(plan.dropped_images, 5);
    }

    #[test]
    fn property_cap_is_wider_than_item_cap() {
        let images: Vec<PathBuf> = (0..60).map(|i| PathBuf::from(format!("{i}.jpg"))).collect();
        let request = ListingRequest::new(ListingKind::Property, "Casa", "Grande")
            .with_images(images.clone());
        let registry = FieldRegistry::for_kind(ListingKind::Property);
        let plan =
            InteractionPlan::build(&request, &registry, &limits(), "https://x/form").unwrap();
        assert_eq!(plan.images.len(), 50);
        assert_eq!(plan.images[0], PathBuf::from("0.jpg"));
        assert_eq!(plan.images[49], PathBuf::from("49.jpg"));
    }

    #[test]
    fn plan_ends_with_review_then_stage_and_never_publishes() {
        let request = ListingRequest::new(ListingKind::Property, "Casa Moderna", "3 recámaras")
            .with_field("precio", "25000");
        let registry = FieldRegistry::for_kind(ListingKind::Property);
        let plan =
            InteractionPlan::build(&request, &registry, &limits(), "https://x/form").unwrap();
        let n = plan.steps.len();
        assert_eq!(plan.steps[n - 2].action, StepAction::Wait);
        assert_eq!(plan.steps[n - 1].action, StepAction::Click);
        assert_eq!(plan.steps[n - 1].target.key, "guardar_borrador");
        // fill steps: titulo, descripcion, precio
        assert_eq!(plan.fill_steps().count(), 3);
    }
}
