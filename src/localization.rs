use anyhow::{anyhow, Result};
use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;
use unic_langid::LanguageIdentifier;

/// Language used when none is requested or the requested one is missing
pub const DEFAULT_LANGUAGE: &str = "es";

const CATALOGUES: &[(&str, &str)] = &[
    ("es", include_str!("../locales/es/main.ftl")),
    ("en", include_str!("../locales/en/main.ftl")),
];

/// Localization manager for the ledger bot
pub struct LocalizationManager {
    bundles: HashMap<String, Arc<FluentBundle<FluentResource>>>,
}

impl LocalizationManager {
    /// Create a new localization manager with every embedded catalogue
    pub fn new() -> Result<Self> {
        let mut bundles = HashMap::new();

        for (code, source) in CATALOGUES {
            let locale: LanguageIdentifier = code.parse()?;
            let bundle = Self::create_bundle(&locale, source)?;
            bundles.insert(code.to_string(), Arc::new(bundle));
        }

        Ok(Self { bundles })
    }

    /// Create a fluent bundle for a specific locale
    fn create_bundle(
        locale: &LanguageIdentifier,
        source: &str,
    ) -> Result<FluentBundle<FluentResource>> {
        let mut bundle = FluentBundle::new_concurrent(vec![locale.clone()]);
        // Messages go to a chat client, not a bidi-aware renderer
        bundle.set_use_isolating(false);

        let resource = FluentResource::try_new(source.to_string())
            .map_err(|(_, errors)| anyhow!("Invalid catalogue for {locale}: {errors:?}"))?;
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow!("Duplicate messages for {locale}: {errors:?}"))?;

        Ok(bundle)
    }

    pub fn supports(&self, language: &str) -> bool {
        self.bundles.contains_key(language)
    }

    /// Get a localized message in a specific language, falling back to the default
    pub fn get_message_in_language(
        &self,
        key: &str,
        language: &str,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let bundle = match self
            .bundles
            .get(language)
            .or_else(|| self.bundles.get(DEFAULT_LANGUAGE))
        {
            Some(bundle) => bundle,
            None => return format!("Missing translation: {key}"),
        };

        let msg = match bundle.get_message(key) {
            Some(msg) => msg,
            None => return format!("Missing translation: {key}"),
        };

        let pattern = match msg.value() {
            Some(pattern) => pattern,
            None => return format!("Missing value for key: {key}"),
        };

        let fluent_args = args.map(|args| {
            let mut fluent_args = FluentArgs::new();
            for (k, v) in args {
                fluent_args.set(*k, FluentValue::from(*v));
            }
            fluent_args
        });

        let mut errors = vec![];
        let value = bundle.format_pattern(pattern, fluent_args.as_ref(), &mut errors);
        if !errors.is_empty() {
            error!(key, ?errors, "Failed to format message");
        }

        value.into_owned()
    }

    /// Get a localized message with simple string arguments
    pub fn get_message_with_args(&self, key: &str, language: &str, args: &[(&str, &str)]) -> String {
        let args_map: HashMap<&str, &str> = args.iter().cloned().collect();
        self.get_message_in_language(key, language, Some(&args_map))
    }
}

lazy_static! {
    static ref LOCALIZATION_MANAGER: Option<LocalizationManager> = match LocalizationManager::new() {
        Ok(manager) => Some(manager),
        Err(e) => {
            error!(error = %e, "Failed to load message catalogues");
            None
        }
    };
}

/// Get the global localization manager
pub fn get_localization_manager() -> Option<&'static LocalizationManager> {
    LOCALIZATION_MANAGER.as_ref()
}

/// Localized message in `language` (default language when `None`)
pub fn t_lang(key: &str, language: Option<&str>) -> String {
    match get_localization_manager() {
        Some(manager) => {
            manager.get_message_in_language(key, language.unwrap_or(DEFAULT_LANGUAGE), None)
        }
        None => format!("Missing translation: {key}"),
    }
}

/// Localized message with arguments
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language: Option<&str>) -> String {
    match get_localization_manager() {
        Some(manager) => {
            manager.get_message_with_args(key, language.unwrap_or(DEFAULT_LANGUAGE), args)
        }
        None => format!("Missing translation: {key}"),
    }
}
