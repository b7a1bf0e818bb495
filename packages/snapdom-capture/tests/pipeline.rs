//! Pipeline-level behaviour that spans modules: preflight memoization and
//! scheduling modes.

use std::sync::Arc;

use snapdom_capture::capture::CaptureDeps;
use snapdom_capture::pseudo::pseudo_preflight;
use snapdom_capture::{CaptureOptions, Session, capture_dom};
use snapdom_dom::document::{Document, DocumentConfig};
use snapdom_dom::TreeTraverser;
use snapdom_html::DocumentHtmlParser;
use snapdom_traits::Rect;
use snapdom_traits::net::DummyFetchBackend;

fn parse(html: &str) -> Document {
    let mut doc = Document::new(DocumentConfig::default());
    DocumentHtmlParser::parse_into_doc(&mut doc, html);
    doc
}

fn find_tag(doc: &Document, tag: &str) -> usize {
    TreeTraverser::new(doc)
        .find(|id| doc.get_node(*id).unwrap().tag_name() == Some(tag))
        .unwrap()
}

#[test]
fn preflight_memoizes_until_the_style_landscape_changes() {
    let mut doc = parse("<div>plain</div>");
    let mut session = Session::new();

    assert!(!pseudo_preflight(&doc, &mut session));
    let first = session.preflight;
    assert!(first.is_some());

    // Unchanged document: the memoized decision is reused verbatim.
    assert!(!pseudo_preflight(&doc, &mut session));
    assert_eq!(session.preflight, first);

    // A new stylesheet with pseudo rules invalidates the fingerprint and
    // flips the decision.
    doc.add_adopted_stylesheet(".x::before { content: \"!\"; }");
    assert!(pseudo_preflight(&doc, &mut session));
    assert_ne!(session.preflight, first);
}

#[test]
fn preflight_sees_counter_properties_in_sheets() {
    let doc = parse("<html><head><style>ol { counter-reset: section; }</style></head><body><ol></ol></body></html>");
    let mut session = Session::new();
    assert!(pseudo_preflight(&doc, &mut session));
}

#[tokio::test]
async fn fast_and_cooperative_modes_agree() {
    let html = "<div><p>one</p><p>two</p><span>three</span></div>";

    let render = |fast: bool| {
        let html = html.to_string();
        async move {
            let mut doc = parse(&html);
            let div = find_tag(&doc, "div");
            doc.set_rect(div, Rect::from_size(120.0, 60.0));
            let deps = CaptureDeps::new(Arc::new(DummyFetchBackend));
            capture_dom(
                &mut doc,
                div,
                CaptureOptions {
                    fast: Some(fast),
                    ..Default::default()
                },
                &deps,
            )
            .await
            .unwrap()
        }
    };

    let fast = render(true).await;
    let cooperative = render(false).await;
    assert_eq!(fast, cooperative);
}
