use std::collections::HashMap;

use tracing::{info, warn};

use crate::roster::{Entry, SysInfo, Update, UpdatesDocument};
use crate::{Error, Result};

const HEADER_FIRST_NAME: &str = "first_name";
const HEADER_LAST_NAME: &str = "name";
const HEADER_CALLSIGN: &str = "callsign";
const HEADER_PHONE_NUMBER: &str = "telephone";
const HEADER_PRIVATE: &str = "privat";

/// Fetches `url` and returns the body. When `cache` points at a file, the
/// body is also mirrored there verbatim so later refreshes can fall back to
/// it offline.
pub async fn read_from_url(
    client: &reqwest::Client,
    url: &str,
    cache: Option<&str>,
) -> Result<Vec<u8>> {
    let body = client.get(url).send().await?.bytes().await?.to_vec();

    if let Some(cache) = cache.filter(|c| !c.is_empty()) {
        match tokio::fs::write(cache, &body).await {
            Ok(()) => info!("locally cached downloaded file: {:?}", cache),
            Err(e) => warn!("unable to write downloaded file to cache: {}", e),
        }
    }
    Ok(body)
}

pub async fn read_from_file(path: &str) -> Result<Vec<u8>> {
    Ok(tokio::fs::read(path).await?)
}

/// Reads a phonebook source, which is either an `http(s)://` URL or an
/// absolute file path, and parses it as the roster CSV.
pub async fn read_phonebook(
    client: &reqwest::Client,
    source: &str,
    cache: Option<&str>,
) -> Result<Vec<Entry>> {
    let blob = if source.starts_with("http://") || source.starts_with("https://") {
        read_from_url(client, source, cache).await?
    } else if source.starts_with('/') {
        read_from_file(source).await?
    } else {
        return Err(Error::Import(format!(
            "unknown or unsupported path scheme (needs to be a valid, absolute file path or http/https URL): {:?}",
            source
        )));
    };
    parse_phonebook_csv(&blob)
}

/// Parses the roster CSV. The header row is required and indexed
/// case-insensitively; a row with all four required columns blank ends the
/// parse; rows marked `privat=y` are skipped.
pub fn parse_phonebook_csv(blob: &[u8]) -> Result<Vec<Entry>> {
    let text = String::from_utf8_lossy(blob);
    let mut rows = csv_rows(&text).into_iter();

    let header = rows
        .next()
        .ok_or_else(|| Error::Import("empty phonebook CSV".to_string()))?;
    let mut columns: HashMap<String, usize> = HashMap::new();
    for (i, name) in header.iter().enumerate() {
        columns.insert(name.trim().to_lowercase(), i);
    }
    let first_idx = column(&columns, HEADER_FIRST_NAME, "first name")?;
    let last_idx = column(&columns, HEADER_LAST_NAME, "last name")?;
    let call_idx = column(&columns, HEADER_CALLSIGN, "callsign")?;
    let phone_idx = column(&columns, HEADER_PHONE_NUMBER, "phone number")?;
    let private_idx = columns.get(HEADER_PRIVATE).copied();

    let mut entries = Vec::new();
    for row in rows {
        let field = |idx: usize| row.get(idx).map(|f| f.trim()).unwrap_or_default();

        // the first fully blank row ends the sheet
        if field(first_idx).is_empty()
            && field(last_idx).is_empty()
            && field(call_idx).is_empty()
            && field(phone_idx).is_empty()
        {
            break;
        }
        if let Some(p) = private_idx {
            if field(p).eq_ignore_ascii_case("y") {
                continue;
            }
        }

        entries.push(Entry {
            first_name: field(first_idx).to_string(),
            last_name: field(last_idx).to_string(),
            callsign: field(call_idx).to_string(),
            phone_number: field(phone_idx).to_string(),
            olsr: None,
        });
    }
    Ok(entries)
}

fn column(columns: &HashMap<String, usize>, key: &str, label: &str) -> Result<usize> {
    columns
        .get(key)
        .copied()
        .ok_or_else(|| Error::Import(format!("unable to locate {} column in CSV", label)))
}

/// Minimal CSV reader: comma separated, double quotes enclose fields,
/// doubled quotes escape a quote. Enough for the phonebook sheets in the
/// wild; anything fancier belongs in the source, not here.
fn csv_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' if in_quotes => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                '"' if field.is_empty() => in_quotes = true,
                ',' if !in_quotes => {
                    fields.push(std::mem::take(&mut field));
                }
                c => field.push(c),
            }
        }
        fields.push(field);
        rows.push(fields);
    }
    rows
}

/// Fetches and parses the node's sysinfo JSON.
pub async fn read_sysinfo(client: &reqwest::Client, url: &str) -> Result<SysInfo> {
    let body = read_from_url(client, url, None).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Tries each update URL in order and returns the first list that fetches
/// and parses. Types are normalized to lowercase.
pub async fn read_updates(client: &reqwest::Client, urls: &[String]) -> Result<Vec<Update>> {
    for url in urls {
        let body = match read_from_url(client, url, None).await {
            Ok(body) => body,
            Err(_) => continue,
        };
        let doc: UpdatesDocument = match serde_json::from_slice(&body) {
            Ok(doc) => doc,
            Err(_) => continue,
        };
        return Ok(doc
            .updates
            .into_iter()
            .map(|mut u| {
                u.info_type = u.info_type.trim().to_lowercase();
                u
            })
            .collect());
    }
    Err(Error::Import(
        "no URLs or none returned any updates".to_string(),
    ))
}
