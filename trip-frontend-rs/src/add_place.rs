use crate::config::AppConfig;
use crate::error::ValidationError;
use crate::model::ImageFile;

/// The add-place form as the user filled it in. `cost` is the raw text of the input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddPlaceForm {
    pub name: String,
    pub description: String,
    pub cost: String,
    pub image: Option<ImageFile>,
}

/// A form that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidPlace {
    pub name: String,
    pub description: String,
    pub cost: i64,
}

impl AddPlaceForm {
    pub fn validate(&self, config: &AppConfig) -> Result<ValidPlace, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if name.chars().count() > config.place_name_max {
            return Err(ValidationError::NameTooLong {
                max: config.place_name_max,
            });
        }

        let description = self.description.trim();
        if description.chars().count() > config.place_description_max {
            return Err(ValidationError::DescriptionTooLong {
                max: config.place_description_max,
            });
        }

        let cost = parse_cost(&self.cost).ok_or(ValidationError::InvalidCost)?;

        Ok(ValidPlace {
            name: name.to_string(),
            description: description.to_string(),
            cost,
        })
    }
}

/// A whole number greater than zero. Fractions are rejected, not rounded.
pub fn parse_cost(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().filter(|cost| *cost > 0)
}
