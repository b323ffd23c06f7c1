use axum::response::Html;

const STYLE: &str = r#"
<style>
  body { font-family: sans-serif; max-width: 760px; margin: 2rem auto; padding: 0 1rem; background: #fffaf3; }
  nav a { margin-right: 1rem; }
  .card { padding: 20px; border-radius: 10px; margin-bottom: 10px; }
  .purpose { background: #e0f7fa; }
  .features { background: #fff3e0; }
  .howto { background: #e6ee9c; }
  .bar { height: 14px; background: #ff8a65; border-radius: 4px; }
  .row { margin: 0.6rem 0; }
  .error { color: #b71c1c; }
</style>
"#;

const NAV: &str = r#"<nav><a href="/">Image Classification</a><a href="/about">About</a></nav>"#;

const UPLOAD_BODY: &str = r#"
<h1>Food Classification</h1>
<h2>Upload an Image for Classification</h2>
<form id="upload">
  <input type="file" name="file" accept="image/jpeg,image/png" required>
  <button type="submit">Classify</button>
</form>
<img id="preview" alt="" style="max-width: 100%; margin-top: 1rem;">
<div id="status"></div>
<div id="results"></div>
<script>
  const form = document.getElementById("upload");
  const status = document.getElementById("status");
  const results = document.getElementById("results");
  const preview = document.getElementById("preview");
  const GENERIC_ERROR = "Classification failed, please try again.";

  form.addEventListener("submit", async (event) => {
    event.preventDefault();
    const file = form.elements.file.files[0];
    if (!file) return;
    preview.src = URL.createObjectURL(file);
    results.innerHTML = "";
    status.className = "";
    status.textContent = "Classifying...";

    const body = new FormData();
    body.append("file", file);
    let response;
    let payload;
    try {
      response = await fetch("/classify", { method: "POST", body });
      payload = await response.json();
    } catch (err) {
      status.className = "error";
      status.textContent = GENERIC_ERROR;
      return;
    }
    if (!response.ok) {
      status.className = "error";
      status.textContent = payload.error || GENERIC_ERROR;
      return;
    }

    status.textContent = "";
    const heading = document.createElement("h2");
    heading.textContent = "Top 5 Predictions:";
    results.appendChild(heading);
    for (const item of payload.data) {
      const pct = (item.confidence * 100).toFixed(1);
      const row = document.createElement("div");
      row.className = "row";
      const label = document.createElement("div");
      label.textContent = `${item.label} (${pct}%)`;
      const bar = document.createElement("div");
      bar.className = "bar";
      bar.style.width = `${pct}%`;
      row.append(label, bar);
      results.appendChild(row);
    }
  });
</script>
"#;

const ABOUT_BODY: &str = r#"
<h1>About this App</h1>
<div class="card purpose">
  <h4>Purpose of this App</h4>
  <p>Upload a photo of a dish and the app classifies it with a pretrained
  image-classification model, so you can quickly identify and learn about
  different foods.</p>
</div>
<div class="card features">
  <h4>Features</h4>
  <ul>
    <li><b>Upload</b> an image of a food dish.</li>
    <li><b>Classify</b> the dish with a pretrained model.</li>
    <li><b>Get</b> the top 5 predictions with probabilities.</li>
    <li><b>Leave</b> a review through <code>/reviews</code>.</li>
  </ul>
</div>
<div class="card howto">
  <h4>How to Use</h4>
  <ol>
    <li>Go to the <b>Image Classification</b> page.</li>
    <li><b>Upload</b> a JPEG or PNG image of a dish.</li>
    <li>Wait for the <b>classification results</b>.</li>
    <li><b>Explore</b> the predictions and learn about new dishes.</li>
  </ol>
</div>
"#;

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{title}</title>{STYLE}</head><body>{NAV}{body}</body></html>"
    ))
}

pub async fn index() -> Html<String> {
    page("Food Classification App", UPLOAD_BODY)
}

pub async fn about() -> Html<String> {
    page("About - Food Classification App", ABOUT_BODY)
}
