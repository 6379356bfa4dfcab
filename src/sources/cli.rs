//! Command-line source.
//!
//! Builds a clap grammar from the schema on first use, parses argv into a
//! flat dot-delimited key space, and resolves that through the same field
//! engine the env source uses. Flag names follow the nested-model path
//! (`--outer.inner.field`); destinations are the preferred field keys so the
//! parsed mapping lines up with every other source.

use std::collections::BTreeMap;
use std::path::Path;

use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Result, SettingsError};
use crate::keymap::{KeyedMapping, MapProvider};
use crate::schema::{Alias, DecodeHint, Field, FieldKind, FlagMode, Schema};
use crate::sources::resolver::FieldResolver;
use crate::sources::{ResolutionConfig, Source};

static VALID_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// `--Flag=Value` splits into the flag portion and everything after it, so
/// case-insensitive matching can fold the flag without touching the value.
static FLAG_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(--?[^\s=]+)(.*)$").expect("valid regex"));

/// Options for [`CliSource`].
#[derive(Debug, Clone)]
pub struct CliOptions {
    /// Program name shown in usage and help; argv\[0\] basename when unset.
    pub prog_name: Option<String>,
    /// Arguments to parse instead of the process argv (without the binary
    /// name).
    pub args: Option<Vec<String>>,
    /// Dotted namespace prepended to every flag and destination.
    pub prefix: Option<String>,
    /// Fold the flag portion of each token to lowercase before parsing.
    pub case_insensitive: bool,
    /// Skip the JSON-blob shortcut flags for nested models.
    pub avoid_json: bool,
    /// Print usage and exit the process on parse errors instead of
    /// returning an error.
    pub exit_on_error: bool,
    /// Render unmarked bool fields as `--flag`/`--no-flag` pairs.
    pub implicit_flags: bool,
    /// Best-effort parsing: do not fail on unknown arguments.
    pub ignore_unknown_args: bool,
    /// Convert flag-name segments from snake_case to kebab-case.
    pub kebab_case: bool,
    /// Make required fields required at the parser level too.
    pub enforce_required: bool,
    /// Flag value parsed as an explicit null; `"null"`, or `"None"` when
    /// `avoid_json` is set.
    pub parse_none_str: Option<String>,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            prog_name: None,
            args: None,
            prefix: None,
            case_insensitive: false,
            avoid_json: false,
            exit_on_error: true,
            implicit_flags: false,
            ignore_unknown_args: false,
            kebab_case: false,
            enforce_required: false,
            parse_none_str: None,
        }
    }
}

impl CliOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prog_name(mut self, name: impl Into<String>) -> Self {
        self.prog_name = Some(name.into());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn case_insensitive(mut self, enabled: bool) -> Self {
        self.case_insensitive = enabled;
        self
    }

    pub fn avoid_json(mut self, enabled: bool) -> Self {
        self.avoid_json = enabled;
        self
    }

    pub fn exit_on_error(mut self, enabled: bool) -> Self {
        self.exit_on_error = enabled;
        self
    }

    pub fn implicit_flags(mut self, enabled: bool) -> Self {
        self.implicit_flags = enabled;
        self
    }

    pub fn ignore_unknown_args(mut self, enabled: bool) -> Self {
        self.ignore_unknown_args = enabled;
        self
    }

    pub fn kebab_case(mut self, enabled: bool) -> Self {
        self.kebab_case = enabled;
        self
    }

    pub fn enforce_required(mut self, enabled: bool) -> Self {
        self.enforce_required = enabled;
        self
    }

    pub fn with_parse_none_str(mut self, sentinel: impl Into<String>) -> Self {
        self.parse_none_str = Some(sentinel.into());
        self
    }

    pub(crate) fn effective(&self, base: &ResolutionConfig) -> ResolutionConfig {
        let default_none = if self.avoid_json { "None" } else { "null" };
        let env_prefix = match self.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}."),
            _ => String::new(),
        };
        ResolutionConfig {
            env_prefix,
            nested_delimiter: Some(".".to_string()),
            // Destinations are exact preferred-key paths; case folding only
            // ever applies to the flag tokens.
            case_sensitive: true,
            populate_by_name: base.populate_by_name,
            ignore_empty: false,
            parse_none_str: Some(
                self.parse_none_str
                    .clone()
                    .or_else(|| base.parse_none_str.clone())
                    .unwrap_or_else(|| default_none.to_string()),
            ),
        }
    }
}

/// How one field materializes in the grammar.
enum ArgShape {
    Positional { variadic: bool },
    Subcommand,
    ModelGroup { exclusive: bool },
    DualFlag,
    ToggleFlag { default_on: bool },
    Append,
    Scalar,
}

struct SortedFields<'s> {
    positionals: Vec<&'s Field>,
    subcommands: Vec<&'s Field>,
    optionals: Vec<&'s Field>,
}

/// Parses command-line arguments against the schema.
#[derive(Debug)]
pub struct CliSource {
    options: CliOptions,
    config: ResolutionConfig,
    command: OnceCell<Command>,
}

impl CliSource {
    pub fn new(options: CliOptions, base: &ResolutionConfig) -> Result<Self> {
        if let Some(prefix) = options.prefix.as_deref() {
            if !prefix.is_empty() && !VALID_PREFIX.is_match(prefix) {
                return Err(SettingsError::Configuration(format!(
                    "CLI settings source prefix is invalid: {prefix}"
                )));
            }
        }
        let config = options.effective(base);
        Ok(Self { options, config, command: OnceCell::new() })
    }

    fn build_command(&self, schema: &Schema) -> Result<&Command> {
        self.command.get_or_try_init(|| {
            let prog_name = self.options.prog_name.clone().unwrap_or_else(default_prog_name);
            let mut command = Command::new(prog_name)
                .no_binary_name(true)
                .subcommand_required(false);
            if self.options.ignore_unknown_args {
                command = command.ignore_errors(true);
            }
            self.add_model_args(command, schema, &self.config.env_prefix, true, None, None, None)
        })
    }

    fn shape(&self, field: &Field) -> ArgShape {
        if field.is_positional() {
            return ArgShape::Positional { variadic: field.kind().is_collection() };
        }
        if field.is_subcommand() {
            return ArgShape::Subcommand;
        }
        if !field.kind().models().is_empty() {
            return ArgShape::ModelGroup { exclusive: field.is_exclusive_group() };
        }
        if field.kind().is_bool() {
            let mode = field.flag_mode().unwrap_or(if self.options.implicit_flags {
                FlagMode::Dual
            } else {
                FlagMode::Explicit
            });
            return match mode {
                FlagMode::Explicit => ArgShape::Scalar,
                FlagMode::Dual => ArgShape::DualFlag,
                FlagMode::Toggle => ArgShape::ToggleFlag {
                    default_on: field.default() == Some(&Value::Bool(true)),
                },
            };
        }
        if wants_append(field.kind()) {
            return ArgShape::Append;
        }
        ArgShape::Scalar
    }

    /// Order and validate one model's fields: positionals (non-variadic
    /// before the single variadic), then subcommand fields, then flags.
    fn sort_fields<'s>(
        &self,
        model: &'s Schema,
        prefix: &str,
        at_root: bool,
    ) -> Result<SortedFields<'s>> {
        let mut plain_positionals = Vec::new();
        let mut variadic_positionals = Vec::new();
        let mut subcommands = Vec::new();
        let mut optionals = Vec::new();
        let mut dests: Vec<(String, &str)> = Vec::new();

        for field in model.fields() {
            let label = format!("{prefix}{}", field.name());
            // Union members sharing a field reuse one arg across models, but
            // two sibling fields of the same model landing on one destination
            // would leave a single ambiguous flag serving both.
            let dest = self.dest_for(field, prefix, at_root);
            if let Some((_, earlier)) = dests.iter().find(|(existing, _)| *existing == dest) {
                return Err(SettingsError::Configuration(format!(
                    "{} has multiple arguments for CLI destination {dest}: {earlier}, {}",
                    model.name(),
                    field.name()
                )));
            }
            dests.push((dest, field.name()));
            if let Some(mode) = field.flag_mode() {
                if !field.kind().is_bool() {
                    return Err(SettingsError::Configuration(format!(
                        "flag argument {label} is not a boolean field"
                    )));
                }
                if mode == FlagMode::Toggle && !matches!(field.default(), Some(Value::Bool(_))) {
                    return Err(SettingsError::Configuration(format!(
                        "toggle flag argument {label} must have a boolean default value"
                    )));
                }
            }
            if field.is_subcommand() {
                if field.default().is_some() {
                    return Err(SettingsError::Configuration(format!(
                        "subcommand argument {label} has a default value"
                    )));
                }
                if has_multiple_aliases(field) {
                    return Err(SettingsError::Configuration(format!(
                        "subcommand argument {label} has multiple aliases"
                    )));
                }
                if !all_members_are_models(field.kind()) {
                    return Err(SettingsError::Configuration(format!(
                        "subcommand argument {label} has type not derived from a settings model"
                    )));
                }
                subcommands.push(field);
            } else if field.is_positional() {
                if has_multiple_aliases(field) {
                    return Err(SettingsError::Configuration(format!(
                        "positional argument {label} has multiple aliases"
                    )));
                }
                if field.kind().is_collection() {
                    variadic_positionals.push(field);
                } else {
                    plain_positionals.push(field);
                }
            } else {
                if field.is_exclusive_group() {
                    for sub_field in field.kind().models().iter().flat_map(|schema| schema.fields()) {
                        if !sub_field.kind().models().is_empty() {
                            return Err(SettingsError::Configuration(format!(
                                "mutually exclusive group {label} cannot contain nested models"
                            )));
                        }
                    }
                }
                optionals.push(field);
            }
        }

        if variadic_positionals.len() > 1 {
            let names: Vec<&str> =
                variadic_positionals.iter().map(|field| field.name()).collect();
            return Err(SettingsError::Configuration(format!(
                "{} has multiple variadic positional arguments: {}",
                model.name(),
                names.join(", ")
            )));
        }
        if !variadic_positionals.is_empty() && !subcommands.is_empty() {
            let names: Vec<&str> = variadic_positionals
                .iter()
                .chain(subcommands.iter())
                .map(|field| field.name())
                .collect();
            return Err(SettingsError::Configuration(format!(
                "{} has variadic positional arguments and subcommand arguments: {}",
                model.name(),
                names.join(", ")
            )));
        }

        let mut positionals = plain_positionals;
        positionals.extend(variadic_positionals);
        Ok(SortedFields { positionals, subcommands, optionals })
    }

    #[allow(clippy::too_many_arguments)]
    fn add_model_args(
        &self,
        mut command: Command,
        model: &Schema,
        prefix: &str,
        at_root: bool,
        heading: Option<&str>,
        group: Option<&str>,
        parent_default: Option<&Map<String, Value>>,
    ) -> Result<Command> {
        let sorted = self.sort_fields(model, prefix, at_root)?;

        for field in &sorted.positionals {
            let dest = self.dest_for(field, prefix, at_root);
            if grammar_has_id(&command, &dest) {
                continue;
            }
            let variadic = field.kind().is_collection();
            let mut arg = Arg::new(dest)
                .value_name(field.name().to_uppercase())
                .action(if variadic { ArgAction::Append } else { ArgAction::Set });
            if variadic {
                arg = arg.num_args(0..);
            } else {
                arg = arg.required(field.is_required());
            }
            if let Some(help) = self.help_for(field, parent_default) {
                arg = arg.help(help);
            }
            if field.is_hidden() {
                arg = arg.hide(true);
            }
            command = set_heading(command, heading).arg(arg);
        }

        for field in &sorted.optionals {
            command = set_heading(command, heading);
            let dest = self.dest_for(field, prefix, at_root);
            match self.shape(field) {
                ArgShape::ModelGroup { exclusive } => {
                    command = self.add_model_group(command, field, &dest, exclusive)?;
                }
                // Union members can declare the same field; the first
                // member's arg wins the id.
                _ if grammar_has_id(&command, &dest) => {}
                ArgShape::DualFlag => {
                    command =
                        self.add_dual_flag(command, field, &dest, prefix, at_root, parent_default);
                }
                ArgShape::ToggleFlag { .. } => {
                    let arg = self
                        .named_arg(field, &dest, prefix, at_root, parent_default)
                        .action(ArgAction::SetTrue);
                    command = command.arg(self.finish_arg(arg, field, group));
                }
                ArgShape::Append => {
                    let arg = self
                        .named_arg(field, &dest, prefix, at_root, parent_default)
                        .action(ArgAction::Append)
                        .value_name(field.name().to_uppercase());
                    command = command.arg(self.finish_arg(arg, field, group));
                }
                ArgShape::Scalar => {
                    let mut arg = self
                        .named_arg(field, &dest, prefix, at_root, parent_default)
                        .action(ArgAction::Set)
                        .value_name(field.name().to_uppercase());
                    if self.options.enforce_required && group.is_none() {
                        arg = arg.required(field.is_required());
                    }
                    command = command.arg(self.finish_arg(arg, field, group));
                }
                ArgShape::Positional { .. } | ArgShape::Subcommand => {}
            }
        }

        command = self.add_subcommands(command, &sorted.subcommands, prefix, at_root)?;
        Ok(command)
    }

    /// A nested-model field: its own help section, a JSON-blob shortcut flag
    /// (unless avoided), and one flag per sub-field under a dotted prefix.
    fn add_model_group(
        &self,
        mut command: Command,
        field: &Field,
        dest: &str,
        exclusive: bool,
    ) -> Result<Command> {
        let group_id = exclusive.then(|| format!("{dest}:group"));
        if let Some(id) = &group_id {
            if !grammar_has_id(&command, id) {
                let mut arg_group = ArgGroup::new(id.clone()).multiple(false);
                if self.options.enforce_required && field.is_required() {
                    arg_group = arg_group.required(true);
                }
                command = command.group(arg_group);
            }
        }

        if !self.options.avoid_json && !grammar_has_id(&command, dest) {
            let mut blob = Arg::new(dest.to_string())
                .long(self.flag_token(self.kebab(dest)))
                .value_name("JSON")
                .num_args(0..=1)
                .default_missing_value("{}")
                .action(ArgAction::Set)
                .help(format!("set {dest} from JSON string"));
            if let Some(id) = &group_id {
                blob = blob.group(id.clone());
            }
            if field.is_hidden() {
                blob = blob.hide(true);
            }
            command = command.arg(blob);
        }

        let parent_default = match field.default() {
            Some(Value::Object(defaults)) => Some(defaults),
            _ => None,
        };
        let heading = dest.to_string();
        for member in field.kind().models() {
            command = self.add_model_args(
                command,
                member,
                &format!("{dest}."),
                false,
                Some(heading.as_str()),
                group_id.as_deref(),
                parent_default,
            )?;
        }
        Ok(command)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_dual_flag(
        &self,
        command: Command,
        field: &Field,
        dest: &str,
        prefix: &str,
        at_root: bool,
        parent_default: Option<&Map<String, Value>>,
    ) -> Command {
        let no_id = format!("{dest}:no");
        let flags = self.flag_names(field, prefix, at_root);
        let primary = flags.first().cloned().unwrap_or_else(|| dest.to_string());
        let mut yes = Arg::new(dest.to_string())
            .long(self.flag_token(self.kebab(&primary)))
            .action(ArgAction::SetTrue)
            .overrides_with(no_id.clone());
        for alias in flags.iter().skip(1) {
            yes = yes.visible_alias(self.flag_token(self.kebab(alias)));
        }
        if let Some(help) = self.help_for(field, parent_default) {
            yes = yes.help(help);
        }
        let mut no = Arg::new(no_id.clone())
            .long(self.flag_token(format!("no-{}", self.kebab(&primary))))
            .action(ArgAction::SetTrue)
            .overrides_with(dest.to_string());
        if field.is_hidden() {
            yes = yes.hide(true);
            no = no.hide(true);
        }
        let mut command = command.arg(yes).arg(no);
        if self.options.enforce_required && field.is_required() {
            command = command.group(
                ArgGroup::new(format!("{dest}:flag"))
                    .args([dest.to_string(), no_id])
                    .multiple(true)
                    .required(true),
            );
        }
        command
    }

    fn add_subcommands(
        &self,
        mut command: Command,
        fields: &[&Field],
        prefix: &str,
        at_root: bool,
    ) -> Result<Command> {
        let mut seen = Vec::new();
        for field in fields {
            let dest = self.dest_for(field, prefix, at_root);
            for member in field.kind().models() {
                let name = self.command_name_for(field, member);
                if seen.contains(&name) {
                    return Err(SettingsError::Configuration(format!(
                        "subcommand name {name} is used by more than one model"
                    )));
                }
                seen.push(name.clone());
                let sub = Command::new(name);
                let sub =
                    self.add_model_args(sub, member, &format!("{dest}."), false, None, None, None)?;
                command = command.subcommand(sub);
            }
        }
        Ok(command)
    }

    /// A flag-style arg with its long name, aliases, and short options
    /// derived from the field's lookup names.
    fn named_arg(
        &self,
        field: &Field,
        dest: &str,
        prefix: &str,
        at_root: bool,
        parent_default: Option<&Map<String, Value>>,
    ) -> Arg {
        let mut arg = Arg::new(dest.to_string());
        let mut longs = Vec::new();
        let mut shorts = Vec::new();
        for flag in self.flag_names(field, prefix, at_root) {
            let mut chars = flag.chars();
            match (chars.next(), chars.next()) {
                (Some(short), None) => shorts.push(short),
                _ => longs.push(self.flag_token(self.kebab(&flag))),
            }
        }
        if let Some((first, rest)) = longs.split_first() {
            arg = arg.long(first.clone());
            for alias in rest {
                arg = arg.visible_alias(alias.clone());
            }
        }
        if let Some((first, rest)) = shorts.split_first() {
            arg = arg.short(*first);
            for alias in rest {
                arg = arg.visible_short_alias(*alias);
            }
        }
        if let Some(help) = self.help_for(field, parent_default) {
            arg = arg.help(help);
        }
        arg
    }

    fn finish_arg(&self, mut arg: Arg, field: &Field, group: Option<&str>) -> Arg {
        if let Some(id) = group {
            arg = arg.group(id.to_string());
        }
        if field.is_hidden() {
            arg = arg.hide(true);
        }
        arg
    }

    /// The flag spellings a field answers to, in priority order. Alias names
    /// are absolute at the root; bare names always take the prefix path, and
    /// nested fields carry their full dotted parent chain.
    fn flag_names(&self, field: &Field, prefix: &str, at_root: bool) -> Vec<String> {
        field
            .lookup_names()
            .iter()
            .filter(|name| {
                **name != field.name()
                    || field.alias().is_none()
                    || self.config.populate_by_name
            })
            .map(|name| {
                if at_root && *name != field.name() {
                    (*name).to_string()
                } else {
                    format!("{prefix}{name}")
                }
            })
            .collect()
    }

    fn dest_for(&self, field: &Field, prefix: &str, at_root: bool) -> String {
        if at_root && field.alias().is_some() {
            field.preferred_key().to_string()
        } else {
            format!("{prefix}{}", field.preferred_key())
        }
    }

    /// Kebab-case the final path segment only; dotted prefixes keep their
    /// declared spelling.
    fn kebab(&self, name: &str) -> String {
        if !self.options.kebab_case {
            return name.to_string();
        }
        match name.rsplit_once('.') {
            Some((path, last)) => format!("{path}.{}", last.replace('_', "-")),
            None => name.replace('_', "-"),
        }
    }

    fn flag_token(&self, name: String) -> String {
        if self.options.case_insensitive {
            name.to_lowercase()
        } else {
            name
        }
    }

    fn member_command_name(&self, member: &Schema) -> String {
        self.command_token(member.name())
    }

    /// A single-member subcommand field is entered by its own preferred
    /// name; each member of a union answers to its model's name.
    fn command_name_for(&self, field: &Field, member: &Schema) -> String {
        if field.kind().models().len() == 1 {
            self.command_token(field.preferred_key())
        } else {
            self.member_command_name(member)
        }
    }

    fn command_token(&self, name: &str) -> String {
        let token = to_snake_case(name);
        if self.options.kebab_case {
            token.replace('_', "-")
        } else {
            token
        }
    }

    fn help_for(&self, field: &Field, parent_default: Option<&Map<String, Value>>) -> Option<String> {
        let shown_default = field.default().cloned().or_else(|| {
            parent_default.and_then(|defaults| {
                defaults
                    .get(field.preferred_key())
                    .or_else(|| defaults.get(field.name()))
                    .cloned()
            })
        });
        match (field.description(), shown_default) {
            (None, None) => None,
            (Some(text), None) => Some(text.to_string()),
            (None, Some(default)) => Some(format!("[default: {default}]")),
            (Some(text), Some(default)) => Some(format!("{text} [default: {default}]")),
        }
    }

    fn fold_flag_tokens(&self, argv: Vec<String>) -> Vec<String> {
        argv.into_iter()
            .map(|token| match FLAG_TOKEN.captures(&token) {
                Some(caps) => format!("{}{}", caps[1].to_lowercase(), &caps[2]),
                None => token,
            })
            .collect()
    }

    /// Walk the matches in the same order the grammar was built, writing raw
    /// string values into the flat dotted key space.
    fn collect(
        &self,
        matches: &ArgMatches,
        model: &Schema,
        prefix: &str,
        at_root: bool,
        out: &mut BTreeMap<String, Value>,
    ) -> Result<()> {
        let sorted = self.sort_fields(model, prefix, at_root)?;

        for field in sorted.positionals.iter().chain(sorted.optionals.iter()) {
            let dest = self.dest_for(field, prefix, at_root);
            match self.shape(field) {
                ArgShape::Positional { variadic: true } | ArgShape::Append => {
                    if let Some(values) = many_strings(matches, &dest) {
                        let merged = if field.decode_hint() == DecodeHint::NoDecode {
                            values.join(",")
                        } else {
                            self.merge_parsed_list(&values, field, &dest)?
                        };
                        out.insert(dest, Value::String(merged));
                    }
                }
                ArgShape::Positional { variadic: false } | ArgShape::Scalar => {
                    if let Some(value) = one_string(matches, &dest) {
                        out.insert(dest, Value::String(value));
                    }
                }
                ArgShape::ModelGroup { .. } => {
                    if !self.options.avoid_json {
                        if let Some(blob) = one_string(matches, &dest) {
                            out.insert(dest.clone(), Value::String(blob));
                        }
                    }
                    for member in field.kind().models() {
                        self.collect(matches, member, &format!("{dest}."), false, out)?;
                    }
                }
                ArgShape::DualFlag => {
                    let no_id = format!("{dest}:no");
                    if flag_set(matches, &no_id) {
                        out.insert(dest, Value::String("false".to_string()));
                    } else if flag_set(matches, &dest) {
                        out.insert(dest, Value::String("true".to_string()));
                    }
                }
                ArgShape::ToggleFlag { default_on } => {
                    if flag_set(matches, &dest) {
                        out.insert(dest, Value::String((!default_on).to_string()));
                    }
                }
                ArgShape::Subcommand => {}
            }
        }

        let chosen = matches.subcommand();
        for field in &sorted.subcommands {
            let dest = self.dest_for(field, prefix, at_root);
            let member = chosen.and_then(|(name, sub_matches)| {
                field
                    .kind()
                    .models()
                    .into_iter()
                    .find(|member| self.command_name_for(field, member) == name)
                    .map(|member| (member, sub_matches))
            });
            match member {
                Some((member, sub_matches)) => {
                    let before = out.len();
                    self.collect(sub_matches, member, &format!("{dest}."), false, out)?;
                    if out.len() == before {
                        out.insert(dest, Value::String("{}".to_string()));
                    }
                }
                None => {
                    // Unchosen subcommands become explicit nulls so merging
                    // can tell "not entered" apart from "entered, no flags".
                    if let Some(sentinel) = &self.config.parse_none_str {
                        out.insert(dest, Value::String(sentinel.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Merge repeated list/dict flag occurrences into one JSON literal.
    ///
    /// Fragments are tokenized by delimiter depth, not regex: quoted strings
    /// may contain commas, and nested `{}`/`[]` pairs must balance.
    fn merge_parsed_list(&self, items: &[String], field: &Field, dest: &str) -> Result<String> {
        self.try_merge_parsed_list(items, field).map_err(|reason| SettingsError::Resolution {
            origin: "CliSource",
            field: dest.to_string(),
            reason,
        })
    }

    fn try_merge_parsed_list(
        &self,
        items: &[String],
        field: &Field,
    ) -> std::result::Result<String, String> {
        let dict_mode = wants_dict_merge(field.kind());
        let quote_numbers = list_inner_is_str(field.kind());
        let mut merged: Vec<String> = Vec::new();
        let mut last_was_value = false;

        for raw in items {
            let mut val = raw.trim().to_string();
            if val.starts_with('[') && val.ends_with(']') && val.len() >= 2 {
                val = val[1..val.len() - 1].trim().to_string();
            }
            while !val.is_empty() {
                val = val.trim_start().to_string();
                if val.starts_with(',') {
                    val = consume_comma(&val, &mut merged, last_was_value);
                    last_was_value = false;
                } else {
                    if val.starts_with('{') || val.starts_with('[') {
                        val = consume_object_or_array(&val, &mut merged)?;
                    } else {
                        val = self.consume_string_or_number(
                            &val,
                            &mut merged,
                            dict_mode,
                            quote_numbers,
                        )?;
                    }
                    last_was_value = true;
                }
            }
            if !last_was_value {
                consume_comma("", &mut merged, last_was_value);
                last_was_value = false;
            }
        }

        if dict_mode {
            let mut entries = Map::new();
            for item in &merged {
                match serde_json::from_str::<Value>(item) {
                    Ok(Value::Object(piece)) => entries.extend(piece),
                    _ => return Err(format!("expected a key=value pair, got '{item}'")),
                }
            }
            Ok(Value::Object(entries).to_string())
        } else {
            Ok(format!("[{}]", merged.join(",")))
        }
    }

    /// Consume one scalar fragment up to the next top-level comma. In dict
    /// mode the fragment is a `key=value` pair; otherwise numbers stay bare
    /// (unless the list holds strings), the none-sentinel becomes `null`,
    /// and anything else is quoted.
    fn consume_string_or_number(
        &self,
        val: &str,
        merged: &mut Vec<String>,
        dict_mode: bool,
        quote_numbers: bool,
    ) -> std::result::Result<String, String> {
        let bytes = val.as_bytes();
        let mut consumed = if dict_mode {
            match val.find('=') {
                Some(pos) => pos + 1,
                None => 0,
            }
        } else {
            0
        };
        let mut in_quotes = false;
        while consumed < bytes.len() {
            if bytes[consumed] == b'"' && (consumed == 0 || bytes[consumed - 1] != b'\\') {
                in_quotes = !in_quotes;
            }
            if bytes[consumed] == b',' && !in_quotes {
                break;
            }
            consumed += 1;
        }
        let piece = val[..consumed].trim();

        if dict_mode {
            let (key, value) = piece
                .split_once('=')
                .ok_or_else(|| format!("expected a key=value pair, got '{piece}'"))?;
            let key = key.trim().trim_matches('"');
            let value = value.trim().trim_matches('"');
            merged.push(Value::Object(Map::from_iter([(
                key.to_string(),
                Value::String(value.to_string()),
            )]))
            .to_string());
        } else {
            let mut piece = piece.to_string();
            if piece.parse::<f64>().is_ok() {
                if quote_numbers {
                    piece = format!("\"{piece}\"");
                }
            } else {
                if Some(piece.as_str()) == self.config.parse_none_str.as_deref() {
                    piece = "null".to_string();
                }
                if !matches!(piece.as_str(), "true" | "false" | "null")
                    && !piece.starts_with('"')
                {
                    piece = format!("\"{piece}\"");
                }
            }
            merged.push(piece);
        }
        Ok(val[consumed..].to_string())
    }
}

impl Source for CliSource {
    fn name(&self) -> &'static str {
        "CliSource"
    }

    fn resolve(&self, schema: &Schema) -> Result<Map<String, Value>> {
        let command = self.build_command(schema)?.clone();
        let argv: Vec<String> = match &self.options.args {
            Some(args) => args.clone(),
            None => std::env::args_os()
                .skip(1)
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
        };
        let argv =
            if self.options.case_insensitive { self.fold_flag_tokens(argv) } else { argv };

        let matches = if self.options.exit_on_error {
            command.get_matches_from(argv)
        } else {
            match command.try_get_matches_from(argv) {
                Ok(matches) => matches,
                Err(err) => match err.kind() {
                    clap::error::ErrorKind::DisplayHelp
                    | clap::error::ErrorKind::DisplayVersion => err.exit(),
                    _ => return Err(SettingsError::CliParse(err.to_string())),
                },
            }
        };

        let mut parsed = BTreeMap::new();
        self.collect(&matches, schema, &self.config.env_prefix, true, &mut parsed)?;
        let mapping = KeyedMapping::new(MapProvider::new(parsed), true);
        FieldResolver::new(&mapping, &self.config, self.name()).resolve(schema)
    }
}

fn set_heading(command: Command, heading: Option<&str>) -> Command {
    match heading {
        Some(text) => command.next_help_heading(text.to_string()),
        None => command.next_help_heading(None::<&str>),
    }
}

fn grammar_has_id(command: &Command, id: &str) -> bool {
    command.get_arguments().any(|arg| arg.get_id().as_str() == id)
        || command.get_groups().any(|group| group.get_id().as_str() == id)
}

// The try_ accessors tolerate ids the grammar dropped (duplicate union
// fields, avoided JSON blobs) and ids registered under another value type.
fn one_string(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.try_get_one::<String>(id).ok().flatten().cloned()
}

fn many_strings(matches: &ArgMatches, id: &str) -> Option<Vec<String>> {
    matches
        .try_get_many::<String>(id)
        .ok()
        .flatten()
        .map(|values| values.cloned().collect())
}

fn flag_set(matches: &ArgMatches, id: &str) -> bool {
    matches.try_get_one::<bool>(id).ok().flatten().copied().unwrap_or(false)
}

fn default_prog_name() -> String {
    std::env::args_os()
        .next()
        .and_then(|path| Path::new(&path).file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "program".to_string())
}

fn has_multiple_aliases(field: &Field) -> bool {
    matches!(field.alias(), Some(Alias::Choices(choices)) if choices.len() > 1)
}

fn all_members_are_models(kind: &FieldKind) -> bool {
    match kind {
        FieldKind::Model(_) => true,
        FieldKind::Union(members) => {
            members.iter().all(|member| matches!(member, FieldKind::Model(_)))
        }
        _ => false,
    }
}

fn wants_append(kind: &FieldKind) -> bool {
    match kind {
        FieldKind::List(_) | FieldKind::Map(_) => true,
        FieldKind::Union(members) => members.iter().any(wants_append),
        _ => false,
    }
}

fn wants_dict_merge(kind: &FieldKind) -> bool {
    match kind {
        FieldKind::Map(_) => true,
        FieldKind::Union(members) => members.iter().any(wants_dict_merge),
        _ => false,
    }
}

fn list_inner_is_str(kind: &FieldKind) -> bool {
    match kind {
        FieldKind::List(inner) => matches!(**inner, FieldKind::Str),
        FieldKind::Union(members) => members.iter().any(list_inner_is_str),
        _ => false,
    }
}

fn consume_comma(val: &str, merged: &mut Vec<String>, last_was_value: bool) -> String {
    if !last_was_value {
        // `--items a,,b` keeps the hole as an empty string
        merged.push("\"\"".to_string());
    }
    val.get(1..).unwrap_or("").to_string()
}

fn consume_object_or_array(
    val: &str,
    merged: &mut Vec<String>,
) -> std::result::Result<String, String> {
    let bytes = val.as_bytes();
    let close = if bytes[0] == b'{' { b'}' } else { b']' };
    let mut depth = 1usize;
    let mut in_quotes = false;
    for consumed in 1..bytes.len() {
        let byte = bytes[consumed];
        if byte == b'"' && bytes[consumed - 1] != b'\\' {
            in_quotes = !in_quotes;
        }
        if in_quotes {
            continue;
        }
        if byte == b'{' || byte == b'[' {
            depth += 1;
        } else if byte == b'}' || byte == b']' {
            depth -= 1;
            if byte == close && depth == 0 {
                merged.push(val[..=consumed].to_string());
                return Ok(val[consumed + 1..].to_string());
            }
        }
    }
    Err(format!("Missing end delimiter \"{}\"", close as char))
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            prev_lower = ch.is_lowercase() || ch.is_numeric();
            out.push(ch);
        }
    }
    out
}
