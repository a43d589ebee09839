/// Longest raw title token (quotes included) the store accepts.
pub const MAX_TITLE_LEN: usize = 5;

const MAIN_NAMESPACE: &str = "0";
const REDIRECT_FLAG: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectRow<'a> {
    pub source_id: u32,
    pub target_title: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRow<'a> {
    pub page_id: u32,
    pub local_title: &'a str,
}

/// Redirect tuple layout: `[source_id, namespace, target_title, ...]`.
///
/// Ids are MediaWiki `page_id`s, which are unsigned 32-bit. A token without
/// letters that still does not fit `u32` (`-4`, `4294967296`) is malformed
/// and skipped like any other rejected row.
pub fn qualify_redirect<'a>(fields: &[&'a str]) -> Option<RedirectRow<'a>> {
    let [raw_id, namespace, title, ..] = fields else {
        return None;
    };
    if raw_id.chars().any(|ch| ch.is_ascii_alphabetic()) {
        return None;
    }
    if *namespace != MAIN_NAMESPACE || !title_fits(title) {
        return None;
    }
    let source_id = raw_id.parse().ok()?;
    Some(RedirectRow {
        source_id,
        target_title: *title,
    })
}

/// Page tuple layout: `[page_id, namespace, title, red_title, is_redirect, ...]`.
pub fn qualify_page<'a>(fields: &[&'a str]) -> Option<PageRow<'a>> {
    let [raw_id, namespace, title, _, redirect_flag, ..] = fields else {
        return None;
    };
    if *redirect_flag != REDIRECT_FLAG || !title_fits(title) || *namespace != MAIN_NAMESPACE {
        return None;
    }
    let page_id = raw_id.parse().ok()?;
    Some(PageRow {
        page_id,
        local_title: *title,
    })
}

fn title_fits(title: &str) -> bool {
    title.chars().count() <= MAX_TITLE_LEN
}
