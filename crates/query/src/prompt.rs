use index::SearchHit;

/// Join retrieved chunks into one context block, in retrieval order.
pub fn build_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| format!("Page {}:\n{}", hit.page, hit.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_answer_prompt(context: &str, question: &str) -> String {
    format!("Context:\n{}\n\nQuestion: {}\nAnswer:", context, question)
}
