//! Sample rendered-markdown documents for testing and demonstration.
//!
//! Each sample is HTML as a markdown renderer would emit it inside a single
//! content container.

/// A 2×2 blue PNG.
pub const TINY_PNG_DATA_URI: &str = "data:image/png;base64,\
    iVBORw0KGgoAAAANSUhEUgAAAAIAAAACCAIAAAD91JpzAAAAEElEQVR4nGNQmXQbiBggFAApDgZF0sCQuwAAAABJRU5ErkJggg==";

/// One heading and one paragraph.
pub fn minimal_note() -> &'static str {
    r#"<div class="markdown-body"><h1>Hello</h1><p>Just one line.</p></div>"#
}

/// Every element the renderer emits, including ones never captured.
pub fn release_notes() -> String {
    format!(
        r##"
<article class="markdown-body">
    <h1 id="release-notes">Release notes</h1>
    <p>This release <strong>rewrites</strong> the exporter and adds <em>sliced</em> pages.
       See <a href="#install">install</a> and run <code>slicer notes.html</code>.</p>

    <h2>Highlights</h2>
    <ul>
        <li>Pages break at headings</li>
        <li>Wide documents keep their width</li>
    </ul>
    <ol>
        <li>Measure</li>
        <li>Slice</li>
        <li>Capture</li>
    </ol>
    <blockquote><p>Long documents no longer hit the bitmap size limit.</p></blockquote>

    <h2 id="install">Install</h2>
    <pre><code>cargo install pdf-slicer
slicer notes.html out/</code></pre>
    <hr>
    <table>
        <tr><th>Option</th><th>Default</th></tr>
        <tr><td>dpr</td><td>1</td></tr>
        <tr><td>selector</td><td>headings</td></tr>
    </table>
    <p><img src="{TINY_PNG_DATA_URI}" alt="logo" style="width: 32px"></p>
    <iframe src="https://example.com/embed"></iframe>
    <h3>Known issues</h3>
    <p>Text is exported as pixels.</p>
</article>
"##
    )
}

/// A long handbook with `sections` chapters of several paragraphs each.
pub fn handbook(sections: usize) -> String {
    let mut html = String::from("<div class=\"markdown-body\">\n<h1>Handbook</h1>\n");
    for s in 1..=sections {
        html.push_str(&format!("<h2>Chapter {s}</h2>\n"));
        for p in 1..=6 {
            html.push_str(&format!(
                "<p>Paragraph {p} of chapter {s}. It carries enough words to wrap \
                 across a couple of lines at a narrow viewport width.</p>\n"
            ));
        }
        if s % 3 == 0 {
            html.push_str(&format!("<h3>Notes on chapter {s}</h3>\n<p>Short aside.</p>\n"));
        }
    }
    html.push_str("</div>");
    html
}

/// Headings with fixed heights and no margins, one per entry of `heights`.
pub fn fixed_sections(heights: &[u32]) -> String {
    let body: String = heights
        .iter()
        .enumerate()
        .map(|(i, h)| format!("<h2 style=\"height: {h}px; margin: 0\">Section {i}</h2>"))
        .collect();
    format!("<div>{body}</div>")
}
