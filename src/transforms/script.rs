//! Request bodies and painless script helpers shared by the transformation steps.

use crate::config::IndexSettings;
use serde_json::{Value, json};

#[derive(Clone, Copy, PartialEq)]
enum Lexer {
    Code,
    Str(char),
    StrEscape(char),
    LineComment,
    BlockComment,
}

/// Removes `//` and `/* */` comments from a painless script and folds it onto
/// one line, collapsing whitespace outside string literals to single spaces.
///
/// Comment markers inside `'...'` or `"..."` literals are kept.
pub fn strip_comments(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    let mut state = Lexer::Code;
    let mut pending_space = false;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Lexer::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = Lexer::LineComment;
                    pending_space = true;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = Lexer::BlockComment;
                    pending_space = true;
                }
                c if c.is_whitespace() => pending_space = true,
                c => {
                    if pending_space && !out.is_empty() {
                        out.push(' ');
                    }
                    pending_space = false;
                    out.push(c);
                    if c == '"' || c == '\'' {
                        state = Lexer::Str(c);
                    }
                }
            },
            Lexer::Str(quote) => {
                out.push(c);
                if c == '\\' {
                    state = Lexer::StrEscape(quote);
                } else if c == quote {
                    state = Lexer::Code;
                }
            }
            Lexer::StrEscape(quote) => {
                out.push(c);
                state = Lexer::Str(quote);
            }
            Lexer::LineComment => {
                if c == '\n' {
                    state = Lexer::Code;
                }
            }
            Lexer::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = Lexer::Code;
                }
            }
        }
    }

    out
}

/// `{"source": ..., "lang": "painless", "params": ...}`
pub fn painless(source: &str, params: Option<Value>) -> Value {
    let mut script = json!({
        "source": strip_comments(source),
        "lang": "painless",
    });
    if let Some(params) = params {
        script["params"] = params;
    }
    script
}

/// Index creation body with shard, replica and field limits taken from `settings`.
/// `monthly` selects the knobs for time-based indices.
pub fn index_creation_body(settings: &IndexSettings, mappings: Value, monthly: bool) -> Value {
    let (shards, replicas, fields_limit, docvalue_fields) = if monthly {
        (
            settings.monthly_number_of_shards,
            settings.monthly_number_of_replicas,
            settings.monthly_total_fields_limit,
            settings.monthly_max_doc_value_fields_search,
        )
    } else {
        (
            settings.number_of_shards,
            settings.number_of_replicas,
            settings.total_fields_limit,
            settings.max_doc_value_fields_search,
        )
    };

    json!({
        "settings": {
            "index": {
                "number_of_shards": shards,
                "number_of_replicas": replicas,
                "mapping.total_fields.limit": fields_limit,
                "max_docvalue_fields_search": docvalue_fields,
            },
            "analysis": {
                "analyzer": {
                    "folding": {
                        "type": "custom",
                        "tokenizer": "keyword",
                        "filter": ["lowercase", "asciifolding"]
                    }
                }
            }
        },
        "mappings": mappings,
    })
}

/// Creation body for the first index behind a rollover alias.
pub fn rollover_index_body(
    settings: &IndexSettings,
    mappings: Value,
    lifecycle_name: &str,
    rollover_alias: &str,
) -> Value {
    let mut body = index_creation_body(settings, mappings, true);
    body["settings"]["index"]["lifecycle.name"] = json!(lifecycle_name);
    body["settings"]["index"]["lifecycle.rollover_alias"] = json!(rollover_alias);
    body["aliases"] = json!({ rollover_alias: { "is_write_index": true } });
    body
}

/// Hot-phase rollover conditions; unset limits are omitted.
pub fn rollover_conditions(settings: &IndexSettings) -> Value {
    let mut conditions = serde_json::Map::new();
    if let Some(age) = settings.rollover_max_age.as_deref().filter(|s| !s.trim().is_empty()) {
        conditions.insert("max_age".to_string(), json!(age));
    }
    if let Some(size) = settings.rollover_max_size.as_deref().filter(|s| !s.trim().is_empty()) {
        conditions.insert("max_size".to_string(), json!(size));
    }
    if let Some(docs) = settings.rollover_max_docs {
        conditions.insert("max_docs".to_string(), json!(docs));
    }
    Value::Object(conditions)
}

/// Lifecycle policy rolling the write index over on [`rollover_conditions`].
pub fn rollover_policy_body(settings: &IndexSettings) -> Value {
    json!({
        "policy": {
            "phases": {
                "hot": {
                    "actions": { "rollover": rollover_conditions(settings) }
                }
            }
        }
    })
}

pub fn reindex_body(source: &str, dest: &str, script: Option<&Value>) -> Value {
    let mut body = json!({
        "source": { "index": source },
        "dest": { "index": dest },
    });
    if let Some(script) = script {
        body["script"] = script.clone();
    }
    body
}

pub fn read_only_settings() -> Value {
    json!({ "index": { "blocks": { "write": true } } })
}

pub fn match_all() -> Value {
    json!({ "match_all": {} })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments_cases() {
        let cases = [
            ("code1\n/* block comment */\ncode2", "code1 code2"),
            ("code1\n// inline comment\ncode2", "code1 code2"),
            ("code1 // inline comment\ncode2", "code1 code2"),
            ("code1 /* block comment */ code2", "code1 code2"),
            ("code1\n/* block\ncomment\nspanning\nlines */\ncode2", "code1 code2"),
            (
                "String s = \"/* not a comment */\";\nString t = \"// not a comment\";",
                "String s = \"/* not a comment */\"; String t = \"// not a comment\";",
            ),
            ("code1\n\n/* block */\n\n// inline\n\ncode2", "code1 code2"),
            ("/* block */ code1\n// inline code2", "code1"),
            ("code /* first */ code /* second */ code // inline", "code code code"),
            ("code /**/ code // \ncode /* */ code", "code code code code"),
            ("code1 // comment\r\ncode2 /* comment */\r\ncode3", "code1 code2 code3"),
            (
                "code1\n/* Block with 'single' and \"double\" quotes */\ncode2\n// Inline with 'single' and \"double\" quotes\ncode3",
                "code1 code2 code3",
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(strip_comments(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_escaped_quote_does_not_end_string() {
        assert_eq!(
            strip_comments(r#"s = "a \" // still string"; // gone"#),
            r#"s = "a \" // still string";"#
        );
        assert_eq!(strip_comments("c = '/*'; x"), "c = '/*'; x");
    }

    #[test]
    fn test_monthly_settings_are_selected() {
        let settings = IndexSettings::default().shards(3, 1).monthly_shards(7, 2);
        let body = index_creation_body(&settings, json!({"properties": {}}), true);
        assert_eq!(body["settings"]["index"]["number_of_shards"], 7);
        assert_eq!(body["settings"]["index"]["number_of_replicas"], 2);
        let body = index_creation_body(&settings, json!({}), false);
        assert_eq!(body["settings"]["index"]["number_of_shards"], 3);
    }

    #[test]
    fn test_rollover_conditions_default_to_size_only() {
        let conditions = rollover_conditions(&IndexSettings::default());
        assert_eq!(conditions, json!({"max_size": "30gb"}));

        let body = rollover_index_body(&IndexSettings::default(), json!({}), "policy", "context-event");
        assert_eq!(body["aliases"]["context-event"]["is_write_index"], true);
        assert_eq!(body["settings"]["index"]["lifecycle.name"], "policy");

        let policy = rollover_policy_body(&IndexSettings::default());
        assert_eq!(
            policy.pointer("/policy/phases/hot/actions/rollover/max_size"),
            Some(&json!("30gb"))
        );
    }
}
