use locale_sync::{
    translations::interpolate, FallbackChain, Locale, ParamValue, Params, TranslationTable,
};
use proptest::prelude::*;

fn any_locale() -> impl Strategy<Value = Locale> {
    prop::sample::select(Locale::ALL.to_vec())
}

proptest! {
    #[test]
    fn translate_is_total(key in ".*", locale in any_locale(), default in any_locale(), secondary in any_locale()) {
        let table = TranslationTable::bundled();
        let chain = FallbackChain::new(default, secondary);
        let text = table.translate(locale, &chain, &key, None, false);
        if table.get(locale, &key).is_none()
            && table.get(default, &key).is_none()
            && table.get(secondary, &key).is_none()
        {
            prop_assert_eq!(text, key);
        }
    }

    #[test]
    fn substitution_replaces_every_occurrence(
        prefix in "[a-z ]{0,8}",
        value in "[A-Za-z0-9 ]{0,12}",
        repeats in 1usize..4,
    ) {
        let template = format!("{}{}", prefix, "{name}-{other}|".repeat(repeats));
        let mut params = Params::new();
        params.insert("name".to_string(), ParamValue::from(value.clone()));
        let out = interpolate(&template, &params);
        prop_assert!(!out.contains("{name}"), "output still contains {{name}}: {}", out);
        prop_assert_eq!(out.matches("{other}").count(), repeats);
        prop_assert_eq!(out, template.replace("{name}", &value));
    }
}
