use citeweave_common::{Chunk, ReferenceTable};
use citeweave_renderer::Renderer;
use citeweave_renderer::citation::{CitationAction, ClickCallback, LinkTarget, RenderDecision};
use citeweave_renderer::normalize::{MARKER_RE, normalize};
use citeweave_renderer::tree::Node;
use std::cell::RefCell;

const REFERENCES: &str = r#"{
  "chunks": [
    {"id": "c0", "document_id": "d0", "content": "quarterly chart", "image_id": "img1", "doc_type": "image"},
    {"id": "c1", "document_id": "missing", "content": "orphan <em>content</em>", "doc_type": "text"},
    {"id": "c2", "document_id": "d2", "content": "Revenue grew <b>12%</b><script>steal()</script><img src=x onerror=alert(1)>", "doc_type": "docx"},
    {"id": "c3", "document_id": "d3", "content": "see appendix", "doc_type": "pdf"}
  ],
  "doc_aggs": [
    {"doc_id": "d0", "doc_name": "chart.png"},
    {"doc_id": "d2", "doc_name": "q3.docx"},
    {"doc_id": "d3", "doc_name": "q3.pdf", "url": "https://example.com/q3.pdf"}
  ]
}"#;

fn table() -> ReferenceTable {
    ReferenceTable::from_json("references.json", REFERENCES).unwrap()
}

fn three_chunks() -> ReferenceTable {
    let table = table();
    ReferenceTable::new(table.chunks()[..3].to_vec(), table.documents().to_vec())
}

#[test]
fn legacy_marker_resolves_to_third_chunk() {
    let renderer = Renderer::default();
    let answer = renderer.render("Revenue grew ##2$$.", &three_chunks());
    assert_eq!(answer.root.annotations(), vec![2]);
    assert_eq!(answer.annotated, 1);
    let Some(RenderDecision::CitationPopover(popover)) = answer.citations.get(&2) else {
        panic!("expected a popover for chunk 2");
    };
    assert_eq!(popover.chunk_id, "c2");
    assert_eq!(
        renderer.to_html(&answer),
        "<p>Revenue grew <span class=\"citation\" data-chunk-index=\"2\">\
         <button class=\"citation-trigger\" popovertarget=\"citation-1\">2</button>\
         <span class=\"citation-popover\" id=\"citation-1\" popover>\
         Revenue grew <b>12%</b><img src=\"x\">\
         <button class=\"citation-document\" data-doc-id=\"d2\">q3.docx</button>\
         </span></span>.</p>\n"
    );
}

#[test]
fn streaming_reasoning_is_an_open_section() {
    let renderer = Renderer::default();
    let answer = renderer.render("<think>partial reasoning", &table());
    let html = renderer.to_html(&answer);
    assert!(html.starts_with(
        "<details class=\"think\" data-streaming=\"true\"><summary>Reasoning</summary>"
    ));
    assert!(html.contains("<p>partial reasoning</p>"));
    assert!(html.trim_end().ends_with("</details>"));
    assert!(!html.contains("think>"));
    assert!(!answer.root.text_content().contains("<think>"));
}

#[test]
fn media_chunk_renders_inline() {
    let renderer = Renderer::default();
    let answer = renderer.render("The chart [ID:0] shows it.", &table());
    assert_eq!(
        answer.citations.get(&0),
        Some(&RenderDecision::InlineMedia {
            image_id: "img1".into(),
            src: "/v1/document/image/img1".into(),
            alt: "chart.png".into(),
        })
    );
    assert!(renderer.to_html(&answer).contains("<img class=\"citation-media\""));
}

#[test]
fn orphan_chunk_has_no_link() {
    let renderer = Renderer::default();
    let answer = renderer.render("Orphaned [ID:1].", &table());
    let Some(RenderDecision::CitationPopover(popover)) = answer.citations.get(&1) else {
        panic!("expected a popover for chunk 1");
    };
    assert_eq!(popover.sanitized_content, "orphan <em>content</em>");
    assert!(popover.document.is_none());
    let html = renderer.to_html(&answer);
    assert!(html.contains("orphan <em>content</em>"));
    assert!(!html.contains("citation-document"));
    assert_eq!(renderer.activate(&answer, &table(), 1), CitationAction::None);
}

#[test]
fn no_executable_markup_survives() {
    let renderer = Renderer::default();
    let text = concat!(
        "Intro [ID:2]\n\n<script>alert(1)</script>\n\n",
        "click <a href=\"javascript:alert(1)\" onclick=\"x()\">here</a> ",
        "or [there](javascript:alert(2))",
    );
    let answer = renderer.render(text, &table());
    let html = renderer.to_html(&answer);
    assert!(!html.contains("<script"), "{html}");
    assert!(!html.contains("onerror"), "{html}");
    assert!(!html.contains("onclick"), "{html}");
    assert!(!html.contains("javascript:"), "{html}");
}

#[test]
fn out_of_range_marker_degrades() {
    let renderer = Renderer::default();
    let answer = renderer.render("Nothing at [ID:9] or [ID:4].", &table());
    assert_eq!(answer.annotated, 0);
    assert_eq!(answer.unresolved, 2);
    assert!(answer.citations.is_empty());
    let html = renderer.to_html(&answer);
    assert_eq!(html, "<p>Nothing at [ID:9] or [ID:4].</p>\n");
}

#[test]
fn every_valid_marker_annotated_once() {
    let renderer = Renderer::default();
    let answer = renderer.render(
        "a [ID:0] b [ID:1] c [ID:0]\n\n- item [ID:3]\n\n`[ID:2]` and\n\n```\n[ID:1]\n```\n",
        &table(),
    );
    assert_eq!(answer.root.annotations(), vec![0, 1, 0, 3]);
    assert_eq!(answer.annotated, 4);
    assert_eq!(answer.citations.len(), 3);

    // no marker left in prose
    answer.root.rewrite(|node, ancestors| {
        if let Node::Text(text) = node {
            if !ancestors.iter().any(|a| a.is_literal()) {
                assert!(!MARKER_RE.is_match(text), "residual marker in {text:?}");
            }
        }
        None
    });
}

#[test]
fn markers_in_html_blocks_resolve() {
    let renderer = Renderer::default();
    let text = "<div>\nSee [ID:0] here\n</div>\n\nand <b>bold [ID:3]</b>";
    let answer = renderer.render(text, &table());
    assert_eq!(answer.annotated, 2);
    assert_eq!(answer.root.annotations(), vec![0, 3]);
    let html = renderer.to_html(&answer);
    assert!(!html.contains("[ID:"), "{html}");
    assert!(html.contains("<b>bold <span class=\"citation\" data-chunk-index=\"3\">"), "{html}");
}

#[test]
fn markers_in_math_stay_source() {
    let renderer = Renderer::default();
    let answer = renderer.render("$x [ID:0]$ but [ID:3]", &table());
    assert_eq!(answer.root.annotations(), vec![3]);
    assert_eq!(answer.unresolved, 0);
    assert!(answer.root.text_content().contains("x [ID:0]"));
}

#[test]
fn streaming_code_in_reasoning_stays_inside() {
    let renderer = Renderer::default();
    let answer = renderer.render("<think>let me check:\n```py\nprint(1)", &table());
    let html = renderer.to_html(&answer);
    assert!(html.contains("print(1)\n</code></pre>"), "{html}");
    assert!(!html.contains("&lt;/details&gt;"), "{html}");
    assert!(html.trim_end().ends_with("</details>"), "{html}");
}

#[test]
fn rerendering_growing_text_is_stable() {
    let renderer = Renderer::default();
    let table = table();
    let full = "<think>checking ##1$$</think>The answer is \\(x^2\\) [ID:0] and ~~2==.";
    let mut last = None;
    for (end, _) in full.char_indices().skip(1).chain([(full.len(), ' ')]) {
        let answer = renderer.render(&full[..end], &table);
        let html = renderer.to_html(&answer);
        assert!(!html.contains("<think>"), "prefix {end}: {html}");
        assert!(!html.contains("&lt;think&gt;"), "prefix {end}: {html}");
        assert!(!html.contains("&lt;t"), "prefix {end}: {html}");
        assert!(!html.contains("&lt;/"), "prefix {end}: {html}");
        last = Some(answer);
    }
    let last = last.unwrap();
    assert_eq!(last.root.annotations(), vec![1, 0, 2]);
    assert_eq!(renderer.render(full, &table).root, last.root);
}

#[test]
fn normalizing_twice_changes_nothing() {
    let samples = [
        "<think>a</think><think>b",
        "##0$$~~1==[ID:2]",
        "\\[\\int_0^1 f\\]\n```\n\\(x\\)\n",
        "text </think> stray",
        "see ##5\\[x\\]",
        "<think>```\n```\n\\(x\\)\n```\n",
        "<think>let me check:\n```py\nprint(1)",
    ];
    for sample in samples {
        let once = normalize(sample);
        assert_eq!(normalize(&once), once);
    }
}

#[test]
fn activation_follows_the_document_kind() {
    let table = table();
    let clicks = RefCell::new(Vec::<(String, Chunk)>::new());
    let on_click = ClickCallback(|doc: &str, chunk: &Chunk| {
        clicks.borrow_mut().push((doc.to_owned(), chunk.clone()));
    });
    let renderer = Renderer::default().with_citation_handler(on_click);
    let answer = renderer.render("one [ID:2] two [ID:3] three [ID:0]", &table);

    assert_eq!(renderer.activate(&answer, &table, 2), CitationAction::Previewed);
    assert_eq!(
        renderer.activate(&answer, &table, 3),
        CitationAction::Navigate("https://example.com/q3.pdf".into())
    );
    assert_eq!(renderer.activate(&answer, &table, 0), CitationAction::None);
    assert_eq!(renderer.activate(&answer, &table, 1), CitationAction::None);

    let RenderDecision::CitationPopover(popover) = &answer.citations[&3] else {
        panic!("expected a popover for chunk 3");
    };
    assert!(matches!(
        popover.document.as_ref().map(|d| &d.target),
        Some(LinkTarget::External { .. })
    ));
    drop(renderer);
    let clicks = clicks.into_inner();
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0].0, "d2");
    assert_eq!(clicks[0].1.id, "c2");
}

#[test]
fn answer_serializes_for_clients() {
    let renderer = Renderer::default();
    let answer = renderer.render("Chart [ID:0]", &table());
    let json = serde_json::to_value(&answer).unwrap();
    assert_eq!(json["annotated"], 1);
    assert_eq!(json["citations"]["0"]["mode"], "inline_media");
    assert_eq!(json["root"]["type"], "element");
    insta::assert_json_snapshot!(answer.root, @r#"
    {
      "type": "element",
      "value": {
        "tag": "root",
        "children": [
          {
            "type": "element",
            "value": {
              "tag": "p",
              "children": [
                {
                  "type": "text",
                  "value": "Chart "
                },
                {
                  "type": "element",
                  "value": {
                    "tag": "citation",
                    "properties": [
                      [
                        "data-chunk-index",
                        "0"
                      ]
                    ]
                  }
                }
              ]
            }
          }
        ]
      }
    }
    "#);
}
