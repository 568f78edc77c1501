use feed_rs::model::Entry;
use feed_rs::parser;
use interfaces::{FeedError, FeedItem};
use tracing::debug;

/// Parse an RSS or Atom document into feed items, in document order.
///
/// Duplicate links are kept; deduplication happens against the store.
pub fn parse_feed(content: &str) -> Result<Vec<FeedItem>, FeedError> {
    debug!("Parsing feed content ({} bytes)", content.len());

    let feed = parser::parse(content.as_bytes())
        .map_err(|e| FeedError::Parse(format!("Failed to parse feed: {}", e)))?;

    let total = feed.entries.len();
    let items: Vec<FeedItem> = feed.entries.into_iter().filter_map(entry_to_item).collect();

    if items.len() < total {
        debug!("Skipped {} entries without a link", total - items.len());
    }
    Ok(items)
}

fn entry_to_item(entry: Entry) -> Option<FeedItem> {
    let link = entry
        .links
        .iter()
        .map(|l| l.href.trim())
        .find(|href| !href.is_empty())?
        .to_string();

    let image_url = extract_image(&entry);

    let mut item = FeedItem::new(link);
    item.title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty());
    item.summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    item.image_url = image_url;
    item.published = entry.published;
    item.updated = entry.updated;

    Some(item)
}

/// First thumbnail, else the first media content that declares an image type.
fn extract_image(entry: &Entry) -> Option<String> {
    let thumbnail = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .find(|uri| !uri.is_empty());

    thumbnail.or_else(|| {
        entry
            .media
            .iter()
            .flat_map(|m| m.content.iter())
            .filter(|c| {
                c.content_type
                    .as_ref()
                    .is_some_and(|mime| mime.to_string().starts_with("image/"))
            })
            .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Grid News</title>
    <link>https://grid.example.com</link>
    <description>Power sector coverage</description>
    <item>
      <title>  ERCOT sets new demand record  </title>
      <link>https://grid.example.com/ercot-record</link>
      <description>Texas demand peaked at 85 GW.</description>
      <pubDate>Mon, 06 Sep 2021 16:45:00 +0000</pubDate>
      <enclosure url="https://grid.example.com/img/ercot.jpg" type="image/jpeg" length="2048"/>
    </item>
    <item>
      <title>ERCOT sets new demand record (updated)</title>
      <link>https://grid.example.com/ercot-record</link>
    </item>
    <item>
      <title>Item without a link</title>
      <description>Should be skipped</description>
    </item>
    <item>
      <link>https://grid.example.com/untitled</link>
      <enclosure url="https://grid.example.com/audio.mp3" type="audio/mpeg" length="1"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_items_in_order_without_dedup() {
        let items = parse_feed(RSS).unwrap();
        assert_eq!(items.len(), 3);

        assert_eq!(items[0].link, "https://grid.example.com/ercot-record");
        assert_eq!(items[0].title.as_deref(), Some("ERCOT sets new demand record"));
        assert_eq!(items[0].summary.as_deref(), Some("Texas demand peaked at 85 GW."));
        assert_eq!(
            items[0].published,
            Some(Utc.with_ymd_and_hms(2021, 9, 6, 16, 45, 0).unwrap())
        );
        assert_eq!(
            items[0].image_url.as_deref(),
            Some("https://grid.example.com/img/ercot.jpg")
        );

        assert_eq!(items[1].link, items[0].link);
        assert_eq!(items[1].published, None);
    }

    #[test]
    fn non_image_enclosures_and_missing_titles() {
        let items = parse_feed(RSS).unwrap();
        let untitled = &items[2];
        assert_eq!(untitled.title, None);
        assert_eq!(untitled.image_url, None);
    }

    #[test]
    fn parses_atom_with_updated_only() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>DOE Newsroom</title>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>2024-05-01T12:00:00Z</updated>
  <entry>
    <title>Loan office backs new transmission line</title>
    <link href="https://energy.example.gov/articles/transmission"/>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>2024-05-01T10:30:00Z</updated>
    <content type="html">The line will carry 3 GW of wind power.</content>
  </entry>
</feed>"#;

        let items = parse_feed(atom).unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.published, None);
        assert_eq!(
            item.effective_time(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap())
        );
        assert_eq!(
            item.summary.as_deref(),
            Some("The line will carry 3 GW of wind power.")
        );
    }

    #[test]
    fn empty_channel_is_not_an_error() {
        let empty = r#"<rss version="2.0"><channel><title>Quiet</title><link>https://q.example.com</link><description>-</description></channel></rss>"#;
        assert_eq!(parse_feed(empty).unwrap(), Vec::new());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_feed("<html><body>Service unavailable</body></html>").unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)), "got {err:?}");
    }
}
