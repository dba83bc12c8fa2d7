pub mod names;

pub use names::{
    ab_match_name, clean_name, clean_name_patch, clean_type, is_after_variant, is_before_variant,
    is_excopy_name, AFTER_PREFIX, BEFORE_PREFIX,
};
