//! End-to-end capture scenarios against the full pipeline, driven through
//! the façade with an in-process fetch backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use snapdom::{CaptureOptions, OutputFormat, Snapdom, SnapdomConfig};
use snapdom_dom::document::{Document, DocumentConfig};
use snapdom_dom::{StyleMap, TreeTraverser};
use snapdom_html::DocumentHtmlParser;
use snapdom_traits::Rect;
use snapdom_traits::net::{
    BoxedFetchFuture, FetchBackend, FetchRequest, FetchResponse,
};

/// Serves canned bodies by URL substring and counts hits.
#[derive(Default)]
struct FixtureBackend {
    routes: Vec<(&'static str, &'static str, &'static [u8])>,
    hits: AtomicUsize,
}

impl FixtureBackend {
    fn with(routes: Vec<(&'static str, &'static str, &'static [u8])>) -> Arc<Self> {
        Arc::new(Self {
            routes,
            hits: AtomicUsize::new(0),
        })
    }
}

impl FetchBackend for FixtureBackend {
    fn fetch(&self, request: FetchRequest) -> BoxedFetchFuture {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let url = request.url.to_string();
        let found = self
            .routes
            .iter()
            .find(|(needle, _, _)| url.contains(needle))
            .map(|(_, mime, body)| (mime.to_string(), Bytes::from_static(body)));
        Box::pin(async move {
            match found {
                Some((mime, bytes)) => Ok(FetchResponse {
                    url,
                    status: 200,
                    mime: Some(mime),
                    bytes,
                }),
                None => Ok(FetchResponse {
                    url,
                    status: 404,
                    mime: None,
                    bytes: Bytes::new(),
                }),
            }
        })
    }
}

// A 1x1 transparent PNG.
const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

fn snap_with(backend: Arc<FixtureBackend>) -> Snapdom {
    Snapdom::new(SnapdomConfig {
        backend: Some(backend as _),
        ..Default::default()
    })
}

fn snap() -> Snapdom {
    snap_with(FixtureBackend::with(vec![]))
}

fn parse(html: &str) -> Document {
    let mut doc = Document::new(DocumentConfig {
        base_url: Some("https://example.com/".to_string()),
    });
    DocumentHtmlParser::parse_into_doc(&mut doc, html);
    doc
}

fn find_tag(doc: &Document, tag: &str) -> usize {
    TreeTraverser::new(doc)
        .find(|id| doc.get_node(*id).unwrap().tag_name() == Some(tag))
        .unwrap_or_else(|| panic!("no <{tag}> in fixture"))
}

fn decode(data_uri: &str) -> String {
    let body = data_uri
        .strip_prefix("data:image/svg+xml;charset=utf-8,")
        .expect("capture result is an svg data uri");
    percent_decode_str(body).decode_utf8().unwrap().into_owned()
}

#[tokio::test]
async fn s1_natural_size_capture() {
    let mut doc = parse("<div>Hello World</div>");
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(100.0, 50.0));

    let result = snap()
        .capture(&mut doc, div, CaptureOptions::default())
        .await
        .unwrap();

    assert!(result.to_raw().starts_with("data:image/svg+xml"));
    let svg = decode(result.to_raw());
    assert!(svg.starts_with("<svg"));
    assert!(svg.ends_with("</svg>"));
    assert!(svg.contains("width=\"100\""));
    assert!(svg.contains("height=\"50\""));
    assert!(svg.contains("viewBox=\"0 0 100 50\""));
    assert!(svg.contains("Hello World"));
    assert!(svg.contains("svg{overflow:visible}"));
    assert!(svg.contains("foreignObject{overflow:visible}"));
}

#[tokio::test]
async fn s2_scale_lands_in_the_wrapper_transform() {
    let mut doc = parse("<div>scaled</div>");
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(100.0, 50.0));

    let snapdom = snap();
    let scaled = snapdom
        .capture(
            &mut doc,
            div,
            CaptureOptions {
                scale: Some(2.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let svg = decode(scaled.to_raw());
    assert!(svg.contains("transform:scale(2)"));

    // Distinct scales produce byte-distinct output.
    let unscaled = snapdom
        .capture(&mut doc, div, CaptureOptions::default())
        .await
        .unwrap();
    assert_ne!(scaled.to_raw(), unscaled.to_raw());
}

#[tokio::test]
async fn s3_blob_background_becomes_a_data_uri() {
    let mut doc = parse("<div style=\"background-image: url(blob:xyz)\">x</div>");
    doc.register_blob("blob:xyz", "image/png", Bytes::from_static(TINY_PNG));
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(10.0, 10.0));

    let result = snap()
        .capture(&mut doc, div, CaptureOptions::default())
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    assert!(svg.contains("data:image/png;base64,"));
    assert!(!svg.contains("blob:"));
}

#[tokio::test]
async fn s4_cross_origin_iframe_becomes_a_placeholder() {
    let mut doc = parse("<div><iframe src=\"https://other.example/page\"></iframe></div>");
    let div = find_tag(&doc, "div");
    let iframe = find_tag(&doc, "iframe");
    doc.set_rect(div, Rect::from_size(300.0, 150.0));
    doc.set_rect(iframe, Rect::from_size(200.0, 100.0));

    let result = snap()
        .capture(&mut doc, div, CaptureOptions::default())
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    assert!(!svg.contains("<iframe"));
    assert!(svg.contains("repeating-linear-gradient"));
    assert!(svg.contains("width:200px"));
    assert!(svg.contains("height:100px"));
}

#[tokio::test]
async fn same_origin_iframe_is_rasterized_inline() {
    let mut doc = parse("<div><iframe></iframe></div>");
    let div = find_tag(&doc, "div");
    let iframe = find_tag(&doc, "iframe");
    doc.set_rect(div, Rect::from_size(300.0, 150.0));
    doc.set_rect(iframe, Rect::from_size(200.0, 100.0));

    let mut inner = parse("<p>inner text</p>");
    let p = find_tag(&inner, "p");
    inner.set_rect(p, Rect::from_size(200.0, 100.0));
    // The iframe's root element carries the viewport box.
    let html = inner.try_root_element().unwrap().id;
    inner.set_rect(html, Rect::from_size(200.0, 100.0));
    doc.set_iframe_document(iframe, inner);

    let result = snap()
        .capture(&mut doc, div, CaptureOptions::default())
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    assert!(!svg.contains("<iframe"));
    // The nested capture rides along as an <img> with a nested svg data URI.
    assert!(svg.contains("<img"));
    assert!(svg.contains("data:image/svg+xml"));
}

#[tokio::test]
async fn s5_list_item_counters_continue_across_siblings() {
    let mut doc = parse("<ol start=\"3\"><li>a</li><li>b</li></ol>");
    let ol = find_tag(&doc, "ol");
    doc.set_rect(ol, Rect::from_size(100.0, 40.0));

    let before = StyleMap::from_inline_css("content: counter(list-item) \".\"");
    let lis: Vec<usize> = TreeTraverser::new(&doc)
        .filter(|id| doc.get_node(*id).unwrap().tag_name() == Some("li"))
        .collect();
    for li in &lis {
        doc.set_pseudo_styles(*li, snapdom_dom::PseudoKind::Before, before.clone());
    }

    let result = snap()
        .capture(&mut doc, ol, CaptureOptions::default())
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    assert!(svg.contains("data-snapdom-pseudo=\"::before\""));
    assert!(svg.contains(">3.</span>"));
    assert!(svg.contains(">4.</span>"));
    // Token concatenation inserts no separator.
    assert!(!svg.contains(">3 .<"));
}

#[tokio::test]
async fn s6_fonts_embed_only_when_codepoints_intersect() {
    let html = r#"
        <html><head><style>
            @font-face {
                font-family: 'Fam';
                src: url(https://cdn.example/fonts/f.woff2) format('woff2');
                unicode-range: U+0400-04FF;
            }
        </style></head>
        <body><div style="font-family: Fam, serif">ascii only</div></body></html>
    "#;
    let backend = FixtureBackend::with(vec![(
        "f.woff2",
        "font/woff2",
        &[0x77, 0x4F, 0x46, 0x32, 0x00, 0x01],
    )]);

    // ASCII-only content does not intersect the Cyrillic range.
    let mut doc = parse(html);
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(100.0, 20.0));
    let result = snap_with(backend.clone())
        .capture(
            &mut doc,
            div,
            CaptureOptions {
                embed_fonts: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!decode(result.to_raw()).contains("@font-face{font-family:'Fam'"));

    // Cyrillic content does.
    let mut doc = parse(&html.replace("ascii only", "\u{0410}"));
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(100.0, 20.0));
    let result = snap_with(backend)
        .capture(
            &mut doc,
            div,
            CaptureOptions {
                embed_fonts: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    assert!(svg.contains("@font-face{font-family:'Fam'"));
    assert!(svg.contains("src:url(data:font/woff2;base64,"));
}

#[tokio::test]
async fn i4_capture_attributes_exclude_and_placeholder() {
    let mut doc = parse(
        "<div><span data-capture=\"exclude\">secret</span>\
         <span data-capture=\"placeholder\" data-placeholder-text=\"REDACTED\">private</span>\
         visible</div>",
    );
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(100.0, 20.0));

    let result = snap()
        .capture(&mut doc, div, CaptureOptions::default())
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    assert!(!svg.contains("secret"));
    assert!(!svg.contains("private"));
    assert!(svg.contains("REDACTED"));
    assert!(svg.contains("visible"));
}

#[tokio::test]
async fn i5_img_sources_are_inlined_or_left_alone() {
    let mut doc = parse(
        "<div><img src=\"https://cdn.example/pic.png\">\
         <img src=\"https://cdn.example/missing.png\"></div>",
    );
    let backend = FixtureBackend::with(vec![("pic.png", "image/png", TINY_PNG)]);
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(100.0, 20.0));

    let result = snap_with(backend)
        .capture(&mut doc, div, CaptureOptions::default())
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    // The resolvable image is a data URI now.
    assert!(svg.contains("data:image/png;base64,"));
    // The unresolvable one keeps its original URL.
    assert!(svg.contains("https://cdn.example/missing.png"));
    assert!(!svg.contains("blob:"));
}

#[tokio::test]
async fn exclude_patterns_and_filters_drop_elements() {
    let mut doc = parse("<div><p class=\"ads\">buy things</p><p>keep me</p></div>");
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(100.0, 20.0));

    let result = snap()
        .capture(
            &mut doc,
            div,
            CaptureOptions {
                exclude: vec![".ads".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    assert!(!svg.contains("buy things"));
    assert!(svg.contains("keep me"));
}

#[tokio::test]
async fn sizing_options_pin_the_wrapper() {
    let mut doc = parse("<div>sized</div>");
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(100.0, 50.0));

    let result = snap()
        .capture(
            &mut doc,
            div,
            CaptureOptions {
                width: Some(400),
                height: Some(300),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    assert!(svg.contains("width:400px"));
    assert!(svg.contains("height:300px"));
    // The svg itself keeps the natural size.
    assert!(svg.contains("viewBox=\"0 0 100 50\""));
}

#[tokio::test]
async fn bad_input_and_measure_errors() {
    let mut doc = parse("<div>x</div>");
    let div = find_tag(&doc, "div");

    let missing = snap().capture(&mut doc, 9999, CaptureOptions::default()).await;
    assert!(matches!(missing, Err(snapdom::CaptureError::BadInput(_))));

    doc.set_rect(div, Rect::new(0.0, 0.0, f64::NAN, 10.0));
    let unmeasurable = snap().capture(&mut doc, div, CaptureOptions::default()).await;
    assert!(matches!(
        unmeasurable,
        Err(snapdom::CaptureError::Measure(_))
    ));
}

#[tokio::test]
async fn to_blob_svg_round_trips_markup() {
    let mut doc = parse("<div>blobbed</div>");
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(80.0, 20.0));

    let result = snap()
        .capture(
            &mut doc,
            div,
            CaptureOptions {
                format: Some(OutputFormat::Svg),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let (mime, bytes) = result.to_blob().unwrap();
    assert_eq!(mime, "image/svg+xml");
    let markup = String::from_utf8(bytes).unwrap();
    assert!(markup.starts_with("<svg"));
    assert!(markup.contains("blobbed"));
}

#[tokio::test]
async fn shadow_roots_mirror_with_scoped_css() {
    let mut doc = parse("<div><section id=\"host\">light</section></div>");
    let div = find_tag(&doc, "div");
    let host = find_tag(&doc, "section");
    doc.set_rect(div, Rect::from_size(100.0, 40.0));

    let shadow_root = doc.attach_shadow_root(host, vec![".inner { color: red; }".to_string()]);
    let inner = doc.create_element("p", &[("class", "inner")]);
    let text = doc.create_text_node("shadow text");
    doc.append_child(shadow_root, inner);
    doc.append_child(inner, text);

    let result = snap()
        .capture(&mut doc, div, CaptureOptions::default())
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    assert!(svg.contains("data-sd=\"s1\""));
    assert!(svg.contains("shadow text"));
    assert!(svg.contains(":where([data-sd=\"s1\"] .inner:not([data-sd-slotted]))"));
    // Light children are replaced by the shadow tree (no slot present).
    assert!(!svg.contains(">light<"));
}

#[tokio::test]
async fn slotted_content_is_marked() {
    let mut doc = parse("<div><section>light content</section></div>");
    let div = find_tag(&doc, "div");
    let host = find_tag(&doc, "section");
    doc.set_rect(div, Rect::from_size(100.0, 40.0));

    let shadow_root = doc.attach_shadow_root(host, vec![]);
    let slot = doc.create_element("slot", &[]);
    doc.append_child(shadow_root, slot);

    let result = snap()
        .capture(&mut doc, div, CaptureOptions::default())
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    assert!(svg.contains("data-sd-slotted"));
    assert!(svg.contains("light content"));
}

#[tokio::test]
async fn svg_use_references_resolve_into_the_clone() {
    let mut doc = parse(
        "<html><body>\
         <svg><symbol id=\"star\"><path d=\"M0 0\"/></symbol></svg>\
         <div id=\"target\"><svg><use href=\"#star\"/></svg></div>\
         </body></html>",
    );
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(24.0, 24.0));

    let result = snap()
        .capture(&mut doc, div, CaptureOptions::default())
        .await
        .unwrap();
    let svg = decode(result.to_raw());
    // Invariant: every <use href="#id"> has a matching definition in-tree.
    assert!(svg.contains("href=\"#star\""));
    assert!(svg.contains("<symbol id=\"star\""));
    assert!(svg.contains("inline-defs-container"));
}

#[tokio::test]
async fn pre_cache_warms_the_image_store() {
    let backend = FixtureBackend::with(vec![("pic.png", "image/png", TINY_PNG)]);
    let mut doc = parse("<div><img src=\"https://cdn.example/pic.png\"></div>");
    let div = find_tag(&doc, "div");
    doc.set_rect(div, Rect::from_size(100.0, 20.0));

    let snapdom = snap_with(backend.clone());
    snapdom
        .pre_cache(&mut doc, div, snapdom::PreCacheOptions::default())
        .await
        .unwrap();
    let after_warm = backend.hits.load(Ordering::SeqCst);
    assert_eq!(after_warm, 1);

    // The capture itself is served from the registry.
    snapdom
        .capture(&mut doc, div, CaptureOptions::default())
        .await
        .unwrap();
    assert_eq!(backend.hits.load(Ordering::SeqCst), after_warm);
}
