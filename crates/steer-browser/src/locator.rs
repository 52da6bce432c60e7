//! Semantic locator engine - maps (role, name) to an XPath expression.
//!
//! Total over all inputs: every known role yields a well-formed union of
//! candidate patterns, unknown roles fall back to a role-attribute match,
//! and any Unicode name embeds safely via [`xpath_literal`].

/// Names longer than this switch to substring containment for links.
const LINK_NAME_THRESHOLD: usize = 30;
/// Names longer than this switch to substring containment for buttons.
const BUTTON_NAME_THRESHOLD: usize = 20;

/// Build the XPath expression for a role/name pair. The caller picks the
/// nth match in document order; this function does no I/O.
pub fn locator_for(role: &str, name: &str) -> String {
    let role = role.trim().to_lowercase();
    let name = name.trim();

    match role.as_str() {
        "button" => button_xpath(name),
        "link" => link_xpath(name),
        "textbox" | "searchbox" => textbox_xpath(name),
        "checkbox" => toggle_xpath("checkbox", name),
        "radio" => toggle_xpath("radio", name),
        "combobox" | "listbox" => combobox_xpath(name),
        "heading" => heading_xpath(name),
        "list" => labelled_xpath(&["ul", "ol"], "list", name),
        "listitem" => text_or_label_xpath(&["li"], "listitem", name),
        "cell" | "gridcell" => cell_xpath(name),
        "row" => labelled_xpath(&["tr"], "row", name),
        "menuitem" => menuitem_xpath(name),
        "tab" => tab_xpath(name),
        "article" => labelled_xpath(&["article"], "article", name),
        "region" | "section" => labelled_xpath(&["section"], "region", name),
        "navigation" | "nav" => labelled_xpath(&["nav"], "navigation", name),
        "main" => labelled_xpath(&["main"], "main", name),
        "banner" => labelled_xpath(&["header"], "banner", name),
        "contentinfo" => labelled_xpath(&["footer"], "contentinfo", name),
        "complementary" => labelled_xpath(&["aside"], "complementary", name),
        _ => {
            let role_lit = xpath_literal(&role);
            if name.is_empty() {
                format!("//*[@role={role_lit}]")
            } else {
                let lit = xpath_literal(name);
                format!(
                    "//*[@role={role_lit} and (normalize-space(.)={lit} or @aria-label={lit})]"
                )
            }
        }
    }
}

fn button_xpath(name: &str) -> String {
    if name.is_empty() {
        return [
            "//button",
            "//input[@type='button']",
            "//input[@type='submit']",
            "//input[@type='reset']",
            "//*[@role='button']",
        ]
        .join(" | ");
    }

    // Long labels are usually model echoes of ellipsized text; match on a
    // stable prefix instead of the exact string.
    if name.chars().count() > BUTTON_NAME_THRESHOLD {
        let lit = xpath_literal(truncate_chars(name, BUTTON_NAME_THRESHOLD));
        return [
            format!("//button[contains(normalize-space(.), {lit})]"),
            format!("//input[@type='button' and contains(@value, {lit})]"),
            format!("//input[@type='submit' and contains(@value, {lit})]"),
            format!("//input[@type='reset' and contains(@value, {lit})]"),
            format!("//button[contains(@aria-label, {lit})]"),
            format!("//*[@role='button' and contains(normalize-space(.), {lit})]"),
            format!("//*[@role='button' and contains(@aria-label, {lit})]"),
        ]
        .join(" | ");
    }

    let lit = xpath_literal(name);
    [
        format!("//button[normalize-space(.)={lit}]"),
        format!("//input[@type='button' and @value={lit}]"),
        format!("//input[@type='submit' and @value={lit}]"),
        format!("//input[@type='reset' and @value={lit}]"),
        format!("//button[@aria-label={lit}]"),
        format!("//*[@role='button' and normalize-space(.)={lit}]"),
        format!("//*[@role='button' and @aria-label={lit}]"),
    ]
    .join(" | ")
}

fn link_xpath(name: &str) -> String {
    if name.is_empty() {
        return "//a[@href] | //*[@role='link']".to_string();
    }

    if name.chars().count() > LINK_NAME_THRESHOLD {
        let lit = xpath_literal(truncate_chars(name, LINK_NAME_THRESHOLD));
        return [
            format!("//a[@href and contains(normalize-space(.), {lit})]"),
            format!("//a[@href and contains(@aria-label, {lit})]"),
            format!("//a[@href and contains(@title, {lit})]"),
            format!("//*[@role='link' and contains(normalize-space(.), {lit})]"),
            format!("//*[@role='link' and contains(@aria-label, {lit})]"),
        ]
        .join(" | ");
    }

    let lit = xpath_literal(name);
    [
        format!("//a[@href and normalize-space(.)={lit}]"),
        format!("//a[@href and @aria-label={lit}]"),
        format!("//a[@href and @title={lit}]"),
        format!("//*[@role='link' and normalize-space(.)={lit}]"),
        format!("//*[@role='link' and @aria-label={lit}]"),
    ]
    .join(" | ")
}

fn textbox_xpath(name: &str) -> String {
    const TYPES: [&str; 7] = ["text", "email", "password", "search", "tel", "url", "number"];

    if name.is_empty() {
        let mut parts: Vec<String> = TYPES
            .iter()
            .map(|t| format!("//input[@type='{t}']"))
            .collect();
        parts.push("//input[not(@type)]".into());
        parts.push("//textarea".into());
        parts.push("//*[@role='textbox']".into());
        parts.push("//*[@role='searchbox']".into());
        return parts.join(" | ");
    }

    let lit = xpath_literal(name);
    let by_name = format!("(@placeholder={lit} or @aria-label={lit})");
    let mut parts: Vec<String> = TYPES
        .iter()
        .map(|t| format!("//input[@type='{t}' and {by_name}]"))
        .collect();
    parts.push(format!("//input[not(@type) and {by_name}]"));
    parts.push(format!("//textarea[{by_name}]"));
    parts.push(format!("//*[@role='textbox' and {by_name}]"));
    parts.push(format!("//*[@role='searchbox' and {by_name}]"));
    parts.push(format!(
        "//input[@id=//label[normalize-space(.)={lit}]/@for]"
    ));
    parts.join(" | ")
}

fn toggle_xpath(kind: &str, name: &str) -> String {
    if name.is_empty() {
        return format!("//input[@type='{kind}'] | //*[@role='{kind}']");
    }
    let lit = xpath_literal(name);
    [
        format!("//input[@type='{kind}' and @aria-label={lit}]"),
        format!("//input[@type='{kind}' and @id=//label[normalize-space(.)={lit}]/@for]"),
        format!("//*[@role='{kind}' and (@aria-label={lit} or normalize-space(.)={lit})]"),
    ]
    .join(" | ")
}

fn combobox_xpath(name: &str) -> String {
    if name.is_empty() {
        return "//select | //*[@role='combobox'] | //*[@role='listbox']".to_string();
    }
    let lit = xpath_literal(name);
    [
        format!("//select[@aria-label={lit}]"),
        format!("//select[@id=//label[normalize-space(.)={lit}]/@for]"),
        format!("//*[@role='combobox' and (@aria-label={lit} or normalize-space(.)={lit})]"),
        format!("//*[@role='listbox' and (@aria-label={lit} or normalize-space(.)={lit})]"),
    ]
    .join(" | ")
}

fn heading_xpath(name: &str) -> String {
    const TAGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];
    if name.is_empty() {
        let mut parts: Vec<String> = TAGS.iter().map(|t| format!("//{t}")).collect();
        parts.push("//*[@role='heading']".into());
        return parts.join(" | ");
    }
    let lit = xpath_literal(name);
    let mut parts: Vec<String> = TAGS
        .iter()
        .map(|t| format!("//{t}[normalize-space(.)={lit}]"))
        .collect();
    parts.push(format!("//*[@role='heading' and normalize-space(.)={lit}]"));
    parts.join(" | ")
}

fn cell_xpath(name: &str) -> String {
    if name.is_empty() {
        return "//td | //th | //*[@role='cell'] | //*[@role='gridcell']".to_string();
    }
    let lit = xpath_literal(name);
    [
        format!("//td[normalize-space(.)={lit}]"),
        format!("//th[normalize-space(.)={lit}]"),
        format!("//*[@role='cell' and normalize-space(.)={lit}]"),
        format!("//*[@role='gridcell' and normalize-space(.)={lit}]"),
    ]
    .join(" | ")
}

fn menuitem_xpath(name: &str) -> String {
    const ROLES: [&str; 3] = ["menuitem", "menuitemcheckbox", "menuitemradio"];
    if name.is_empty() {
        return ROLES
            .iter()
            .map(|r| format!("//*[@role='{r}']"))
            .collect::<Vec<_>>()
            .join(" | ");
    }
    let lit = xpath_literal(name);
    ROLES
        .iter()
        .map(|r| {
            format!("//*[@role='{r}' and (normalize-space(.)={lit} or @aria-label={lit})]")
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn tab_xpath(name: &str) -> String {
    if name.is_empty() {
        return "//*[@role='tab']".to_string();
    }
    let lit = xpath_literal(name);
    format!("//*[@role='tab' and (normalize-space(.)={lit} or @aria-label={lit})]")
}

/// Landmark-style roles: a native tag plus the role-attribute form, named by
/// aria-label only.
fn labelled_xpath(tags: &[&str], role: &str, name: &str) -> String {
    if name.is_empty() {
        let mut parts: Vec<String> = tags.iter().map(|t| format!("//{t}")).collect();
        parts.push(format!("//*[@role='{role}']"));
        return parts.join(" | ");
    }
    let lit = xpath_literal(name);
    let mut parts: Vec<String> = tags
        .iter()
        .map(|t| format!("//{t}[@aria-label={lit}]"))
        .collect();
    parts.push(format!("//*[@role='{role}' and @aria-label={lit}]"));
    parts.join(" | ")
}

/// Roles whose name is textually meaningful: match text or aria-label.
fn text_or_label_xpath(tags: &[&str], role: &str, name: &str) -> String {
    if name.is_empty() {
        let mut parts: Vec<String> = tags.iter().map(|t| format!("//{t}")).collect();
        parts.push(format!("//*[@role='{role}']"));
        return parts.join(" | ");
    }
    let lit = xpath_literal(name);
    let mut parts: Vec<String> = tags
        .iter()
        .map(|t| format!("//{t}[normalize-space(.)={lit} or @aria-label={lit}]"))
        .collect();
    parts.push(format!(
        "//*[@role='{role}' and (normalize-space(.)={lit} or @aria-label={lit})]"
    ));
    parts.join(" | ")
}

/// Quote a string as an XPath literal. Plain strings wrap in single quotes,
/// strings holding only single quotes wrap in double quotes, and strings
/// with both kinds assemble via `concat(...)`.
pub fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        return format!("'{s}'");
    }
    if !s.contains('"') {
        return format!("\"{s}\"");
    }

    let mut parts = Vec::new();
    for (i, piece) in s.split('\'').enumerate() {
        if i > 0 {
            parts.push("\"'\"".to_string());
        }
        if !piece.is_empty() {
            parts.push(format!("'{piece}'"));
        }
    }
    // concat() requires at least two arguments.
    if parts.len() == 1 {
        return parts.remove(0);
    }
    format!("concat({})", parts.join(", "))
}

/// First `max` characters, respecting char boundaries.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
