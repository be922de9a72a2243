extern crate proc_macro;

use proc_macro::{Delimiter, TokenStream, TokenTree};

/// `#[derive(FromConfig)]` for plain structs. Generates a `FromConfig` impl
/// that starts from `Self::default()` and, for each field whose name matches
/// a key in the parsed config, overwrites it via `FromConfigValue`. Keys
/// with no matching field are left alone by the generated code (the loop
/// just never visits them), matching the "unknown keys are ignored" rule.
#[proc_macro_derive(FromConfig)]
pub fn derive_from_config(input: TokenStream) -> TokenStream {
    let struct_name = match extract_struct_name(input.clone()) {
        Some(name) => name,
        None => return quote_error("expected a struct definition"),
    };

    let fields = match extract_struct_fields(input) {
        Some(f) if !f.is_empty() => f,
        Some(_) => return quote_error("struct has no fields to populate from config"),
        None => return quote_error("could not locate struct body"),
    };

    let arms = generate_match_arms(&fields);
    let code = format_impl_code(&struct_name, &arms);

    code.parse()
        .unwrap_or_else(|_| quote_error("generated FromConfig impl was invalid"))
}

// ====== Field Extraction ======

fn extract_struct_name(input: TokenStream) -> Option<String> {
    let mut tokens = input.into_iter();

    while let Some(token) = tokens.next() {
        if let TokenTree::Ident(ident) = token {
            if ident.to_string() == "struct" {
                if let Some(TokenTree::Ident(name)) = tokens.next() {
                    return Some(name.to_string());
                }
            }
        }
    }

    None
}

fn extract_struct_fields(input: TokenStream) -> Option<Vec<String>> {
    let tokens: Vec<TokenTree> = input.into_iter().collect();

    for token in tokens.iter() {
        if let TokenTree::Group(group) = token {
            if group.delimiter() == Delimiter::Brace {
                let mut fields = Vec::new();
                parse_field_names(group.stream(), &mut fields);
                return Some(fields);
            }
        }
    }

    None
}

fn parse_field_names(group_stream: TokenStream, fields: &mut Vec<String>) {
    let mut group_iter = group_stream.into_iter();
    let mut last_ident = String::new();

    while let Some(inner_token) = group_iter.next() {
        match inner_token {
            TokenTree::Ident(ident) => {
                let s = ident.to_string();
                if !is_keyword(&s) {
                    last_ident = s;
                }
            }
            TokenTree::Punct(punct) => {
                if punct.as_char() == ':' {
                    if !last_ident.is_empty() {
                        fields.push(last_ident.clone());
                        last_ident.clear();
                    }
                    skip_to_comma(&mut group_iter);
                }
            }
            _ => {}
        }
    }
}

fn is_keyword(s: &str) -> bool {
    matches!(s, "pub" | "crate" | "super")
}

fn skip_to_comma(iter: &mut impl Iterator<Item = TokenTree>) {
    let mut depth = 0i32;
    for token in iter.by_ref() {
        match token {
            TokenTree::Punct(p) if p.as_char() == ',' && depth == 0 => break,
            TokenTree::Group(_) => depth += 0, // groups are already self-contained tokens
            _ => {}
        }
    }
}

// ====== Code Generation ======

fn generate_match_arms(fields: &[String]) -> String {
    let mut arms = String::new();

    for field in fields {
        arms.push_str(&format!(
            r#""{field}" => {{
    obj.{field} = zv_config::invalid_value(entry, zv_config::FromConfigValue::from_config_value(&entry.value))?;
}}
"#,
            field = field,
        ));
    }

    arms
}

fn format_impl_code(struct_name: &str, arms: &str) -> String {
    format!(
        r#"impl zv_config::FromConfig for {struct_name} {{
    fn from_config(raw: &zv_config::RawConfig) -> Result<Self, zv_config::ConfigError> {{
        let mut obj = Self::default();
        for entry in raw.entries() {{
            match entry.key.as_str() {{
                {arms}
                _ => {{}}
            }}
        }}
        Ok(obj)
    }}
}}"#,
        struct_name = struct_name,
        arms = arms,
    )
}

// ====== Error Handling ======

fn quote_error(msg: &str) -> TokenStream {
    format!("compile_error!(\"FromConfig derive error: {}\");", msg)
        .parse()
        .unwrap()
}
