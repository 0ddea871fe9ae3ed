//! Reserved template attribute and operator names.

/// The placeholder marker.
pub const PLACEHOLDER: &str = "?";

pub const COLLECTION_FIELD: &str = "collection";
pub const DISTINCT_FIELD: &str = "distinct";
pub const PROJECTION_FIELD: &str = "projection";

pub const SET_FIELD: &str = "$set";
pub const UNSET_FIELD: &str = "$unset";
pub const REGEX_FIELD: &str = "$regex";
pub const OPTIONS_FIELD: &str = "$options";
pub const CASE_INSENSITIVE_OPTION: &str = "i";

/// Field that receives case-insensitive `$regex` matches.
pub const USER_NAME_FIELD: &str = "UM_USER_NAME";

/// Wildcard binding value; leaves bound to it are left out of filters.
pub const FILTER_OPERATOR: &str = "*";

pub const LIMIT_FIELD: &str = "$limit";
pub const LOOKUP_FIELD: &str = "$lookup";
pub const UNWIND_FIELD: &str = "$unwind";
pub const MATCH_FIELD: &str = "$match";
pub const SORT_FIELD: &str = "$sort";
pub const GROUP_FIELD: &str = "$group";
pub const PROJECT_FIELD: &str = "$project";

/// Marker on a `$lookup` body ordering it after the unwind of its alias.
pub const DEPENDENCY_FIELD: &str = "dependency";
pub const LOOKUP_ALIAS_FIELD: &str = "as";

/// Returns `true` for template keys that name a `$lookup` stage (`$lookup`, `$lookupRole`, ...).
pub fn is_lookup_key(key: &str) -> bool {
    key.contains(LOOKUP_FIELD)
}

/// Returns `true` for template keys that name an `$unwind` stage (`$unwind`, `$unwindSub`, ...).
pub fn is_unwind_key(key: &str) -> bool {
    key.starts_with(UNWIND_FIELD)
}
