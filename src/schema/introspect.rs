//! Candidate-key extraction.
//!
//! Turns one [`Field`] declaration into the ordered list of lookup keys a
//! key/value source will try. Aliases come first in declaration order; the
//! env-prefixed bare name is appended as the lowest-priority candidate when
//! no alias exists or populate-by-name is on. Case folding applies to the
//! lookup name only; the field key kept for the merge result is untouched.

use super::{Alias, AliasChoice, Field};

/// One way a source may supply a field's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateKey {
    /// Key used for the field in the merged result.
    pub field_key: String,
    /// Name looked up in the source, already case-folded when insensitive.
    pub lookup: String,
    /// Whether the candidate's value needs JSON decoding regardless of the
    /// field's own kind (alias paths deeper than one level index into a
    /// structured value).
    pub complex: bool,
}

pub(crate) fn fold(name: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        name.to_string()
    } else {
        name.to_lowercase()
    }
}

/// Candidates for a top-level field. Alias names are absolute; only the
/// bare-name fallback takes the env prefix.
pub fn field_candidates(
    field: &Field,
    env_prefix: &str,
    case_sensitive: bool,
    populate_by_name: bool,
) -> Vec<CandidateKey> {
    let mut candidates = Vec::new();
    match field.alias() {
        Some(Alias::Name(name)) => {
            candidates.push(CandidateKey {
                field_key: name.clone(),
                lookup: fold(name, case_sensitive),
                complex: false,
            });
        }
        Some(Alias::Choices(choices)) => {
            for choice in choices {
                let (head, complex) = match choice {
                    AliasChoice::Name(name) => (name.as_str(), false),
                    AliasChoice::Path(path) => (path.head(), path.depth() > 1),
                };
                candidates.push(CandidateKey {
                    field_key: head.to_string(),
                    lookup: fold(head, case_sensitive),
                    complex,
                });
            }
        }
        Some(Alias::Path(path)) => {
            candidates.push(CandidateKey {
                field_key: path.head().to_string(),
                lookup: fold(path.head(), case_sensitive),
                complex: path.depth() > 1,
            });
        }
        None => {}
    }

    if field.alias().is_none() || populate_by_name {
        let bare = CandidateKey {
            field_key: field.name().to_string(),
            lookup: fold(&format!("{env_prefix}{}", field.name()), case_sensitive),
            complex: field.kind().union_contains_complex(),
        };
        if !candidates.iter().any(|existing| existing.lookup == bare.lookup) {
            candidates.push(bare);
        }
    }

    candidates
}

/// Candidates for a sub-model field reached through a nesting delimiter.
/// Every name (aliases and the bare name) is relative and takes the prefix.
pub fn nested_field_candidates(field: &Field, prefix: &str, case_sensitive: bool) -> Vec<CandidateKey> {
    let mut candidates: Vec<CandidateKey> = Vec::new();
    for name in field.lookup_names() {
        let complex = match field.alias() {
            Some(Alias::Path(path)) if path.head() == name => path.depth() > 1,
            Some(Alias::Choices(choices)) => choices.iter().any(|choice| match choice {
                AliasChoice::Path(path) => path.head() == name && path.depth() > 1,
                AliasChoice::Name(_) => false,
            }),
            _ => false,
        } || (name == field.name() && field.kind().union_contains_complex());
        let lookup = format!("{prefix}{}", fold(name, case_sensitive));
        if !candidates.iter().any(|existing| existing.lookup == lookup) {
            candidates.push(CandidateKey { field_key: name.to_string(), lookup, complex });
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AliasPath, FieldKind};

    #[test]
    fn bare_name_takes_env_prefix_and_folds_lookup_only() {
        let field = Field::new("ApiKey", FieldKind::Str);
        let candidates = field_candidates(&field, "APP_", false, false);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].field_key, "ApiKey");
        assert_eq!(candidates[0].lookup, "app_apikey");
        assert!(!candidates[0].complex);
    }

    #[test]
    fn case_sensitive_lookup_keeps_original_case() {
        let field = Field::new("ApiKey", FieldKind::Str);
        let candidates = field_candidates(&field, "APP_", true, false);
        assert_eq!(candidates[0].lookup, "APP_ApiKey");
    }

    #[test]
    fn alias_choices_stay_in_declaration_order_without_prefix() {
        let field = Field::new("verbosity", FieldKind::Int)
            .with_alias(Alias::choices(["V", "verbose"]));
        let candidates = field_candidates(&field, "APP_", false, false);
        let lookups: Vec<&str> = candidates.iter().map(|c| c.lookup.as_str()).collect();
        assert_eq!(lookups, vec!["v", "verbose"]);
        assert_eq!(candidates[0].field_key, "V");
    }

    #[test]
    fn populate_by_name_appends_bare_candidate_after_aliases() {
        let field = Field::new("verbosity", FieldKind::Int)
            .with_alias(Alias::Name("v".to_string()));
        let candidates = field_candidates(&field, "", false, true);
        let lookups: Vec<&str> = candidates.iter().map(|c| c.lookup.as_str()).collect();
        assert_eq!(lookups, vec!["v", "verbosity"]);
    }

    #[test]
    fn deep_alias_path_is_marked_complex() {
        let field = Field::new("x", FieldKind::Str)
            .with_alias(Alias::Path(AliasPath::new("data").index(0)));
        let candidates = field_candidates(&field, "", false, false);
        assert_eq!(candidates[0].field_key, "data");
        assert!(candidates[0].complex);

        let shallow = Field::new("x", FieldKind::Str)
            .with_alias(Alias::Path(AliasPath::new("data")));
        assert!(!field_candidates(&shallow, "", false, false)[0].complex);
    }

    #[test]
    fn union_with_complex_member_marks_bare_candidate_complex() {
        let field = Field::new(
            "x",
            FieldKind::Union(vec![FieldKind::Str, FieldKind::list_of(FieldKind::Int)]),
        );
        assert!(field_candidates(&field, "", false, false)[0].complex);

        let plain = Field::new("x", FieldKind::list_of(FieldKind::Int));
        assert!(!field_candidates(&plain, "", false, false)[0].complex);
    }

    #[test]
    fn nested_candidates_prefix_every_name() {
        let field = Field::new("inner", FieldKind::Str)
            .with_alias(Alias::Name("in".to_string()));
        let candidates = nested_field_candidates(&field, "outer__", false);
        let lookups: Vec<&str> = candidates.iter().map(|c| c.lookup.as_str()).collect();
        assert_eq!(lookups, vec!["outer__in", "outer__inner"]);
    }
}
