use super::FeedbackRequest;
use std::fmt::Write;

/// Instructions sent with the side-by-side comparison image.
pub fn build_prompt(request: &FeedbackRequest<'_>) -> String {
    let mut out = String::new();
    let parts: Vec<String> = request
        .placements
        .categories()
        .iter()
        .map(|c| c.to_string())
        .collect();

    let _ = writeln!(
        out,
        "You are tuning a face illustration assembled from separate part images (round {}).",
        request.iteration
    );
    out.push_str(
        "The image shows the original photo on the LEFT and the current illustration on the RIGHT.\n\
         Compare the positions and sizes of the parts and propose small corrections that make the \
         illustration resemble the photo more closely.\n\n",
    );

    let _ = writeln!(out, "## Parts\n{}\n", parts.join(", "));
    out.push_str("Current placements (offsets from the canvas centre in reference units):\n");
    for (key, spec) in request.placements.iter() {
        let _ = writeln!(
            out,
            "- {key}: x={:.1} y={:.1} scale={:.3}",
            spec.base_x, spec.base_y, spec.initial_scale
        );
    }

    out.push_str(
        "\n## Coordinates\n\
         Image coordinates: `up` moves a part towards the top of the image (y decreases), \
         `down` moves it towards the bottom (y increases).\n\n\
         ## Vocabulary\n\
         - position: up, down, left, right (5 units) or up_slight, down_slight, left_slight, right_slight (3 units)\n\
         - scale: bigger, smaller (5%) or bigger_slight, smaller_slight (3%)\n\
         Use `eye`, `eyebrow` or `ear` to move both sides together, or `eye.left` / `eye.right` for one side.\n",
    );

    let rounds: Vec<_> = request
        .history
        .iterations()
        .iter()
        .filter(|it| it.iteration > 0)
        .collect();
    if !rounds.is_empty() {
        out.push_str("\n## History\n");
        for round in rounds {
            let steps = if round.applied.is_empty() {
                "no change".to_string()
            } else {
                round
                    .applied
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let _ = write!(out, "- round {}: {steps}", round.iteration);
            if let Some(score) = round.similarity {
                let _ = write!(out, " (similarity before: {score:.2})");
            }
            out.push('\n');
        }
        out.push_str(
            "Keep adjustments that improved similarity, avoid undoing the previous round, \
             and try another part if a part keeps moving back and forth.\n",
        );
    }

    out.push_str(
        "\n## Output\n\
         Reply with a single JSON object:\n\
         ```json\n\
         {\n\
         \x20 \"comparison_analysis\": {\"similarity_score\": 0.0, \"main_differences\": [\"...\"]},\n\
         \x20 \"adjustments\": {\"eye\": {\"position\": \"up_slight\", \"reason\": \"...\"}, \"mouth\": {\"scale\": \"bigger\"}},\n\
         \x20 \"satisfied\": false,\n\
         \x20 \"notes\": \"...\"\n\
         }\n\
         ```\n\
         Set `satisfied` to true and leave `adjustments` empty when no further change would help.\n",
    );
    out
}
