pub mod constraints;
pub mod intent;
pub mod metadata;
pub mod terms;
pub mod validation;

pub use constraints::{
	Assumption, BoundingBox, InferredConstraints, TemporalRange, infer_bbox, infer_constraints, infer_temporal,
};
pub use intent::Intent;
pub use metadata::{Item, ItemSet, Platform, merge_unique};
pub use validation::{Validation, validate};
