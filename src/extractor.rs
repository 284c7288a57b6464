//! Contextual embedding extraction for a focus word
//!
//! For each sentence the focus word is located, its hidden state is read at
//! the penultimate layer, and the word is masked to ask the model for likely
//! substitutes. Every substitute is then embedded on its own so it can be
//! plotted next to the focus point it was predicted for.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, VizError};
use crate::model::MaskedLanguageModel;
use crate::positioning::{find_word_char_range, EncodingWithOffsets, TokenSpan};
use crate::predictions::{filter_candidates, top_k_from_logits, TokenPrediction};

/// How the focus word is located among a sentence's tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMatch {
    /// A token whose string equals the word exactly
    #[default]
    ExactToken,
    /// Exact token, else the word's piece sequence, else its character range
    SubwordSpan,
}

/// Tuning knobs for [`EmbeddingExtractor`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorOptions {
    pub focus_match: FocusMatch,
    /// Candidates ranked per requested neighbor before filtering
    pub oversample_factor: usize,
    /// Neighbors embedded per forward pass (1 = one at a time)
    pub neighbor_batch_size: usize,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            focus_match: FocusMatch::ExactToken,
            oversample_factor: 10,
            neighbor_batch_size: 1,
        }
    }
}

/// A sentence with its tokenization and the located focus span
#[derive(Debug, Clone)]
pub struct Context {
    pub sentence: String,
    pub encoding: EncodingWithOffsets,
    pub focus_span: TokenSpan,
}

/// A masked-position substitute with its standalone embedding
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub token: String,
    pub token_id: u32,
    pub probability: f32,
    pub vector: Vec<f32>,
}

/// Focus vector and neighbors for one context
#[derive(Debug, Clone)]
pub struct ContextEmbedding {
    pub sentence: String,
    pub focus_span: TokenSpan,
    pub focus_vector: Vec<f32>,
    pub neighbors: Vec<Neighbor>,
}

impl ContextEmbedding {
    pub fn neighbor_tokens(&self) -> Vec<String> {
        self.neighbors.iter().map(|n| n.token.clone()).collect()
    }

    pub fn neighbor_vectors(&self) -> Vec<Vec<f32>> {
        self.neighbors.iter().map(|n| n.vector.clone()).collect()
    }
}

/// Everything extracted for one word, contexts in input order
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub word: String,
    pub contexts: Vec<ContextEmbedding>,
}

impl ExtractionResult {
    /// One focus vector per input sentence
    pub fn focus_vectors(&self) -> Vec<Vec<f32>> {
        self.contexts.iter().map(|c| c.focus_vector.clone()).collect()
    }

    /// `(token, vector)` lists aligned with [`Self::focus_vectors`]
    pub fn neighbors(&self) -> Vec<Vec<(String, Vec<f32>)>> {
        self.contexts
            .iter()
            .map(|c| {
                c.neighbors
                    .iter()
                    .map(|n| (n.token.clone(), n.vector.clone()))
                    .collect()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Extracts focus and neighbor vectors through a [`MaskedLanguageModel`]
pub struct EmbeddingExtractor<M: MaskedLanguageModel> {
    model: M,
    options: ExtractorOptions,
}

impl<M: MaskedLanguageModel> EmbeddingExtractor<M> {
    pub fn new(model: M) -> Self {
        Self::with_options(model, ExtractorOptions::default())
    }

    pub fn with_options(model: M, options: ExtractorOptions) -> Self {
        Self { model, options }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn options(&self) -> &ExtractorOptions {
        &self.options
    }

    /// Extract focus vectors and `top_n` neighbors for every sentence
    ///
    /// The first sentence in which the word cannot be located aborts the
    /// whole run with [`VizError::FocusWordNotFound`].
    pub fn extract<S: AsRef<str>>(
        &self,
        word: &str,
        sentences: &[S],
        top_n: usize,
    ) -> Result<ExtractionResult> {
        if word.trim().is_empty() {
            return Err(VizError::InvalidRequest("focus word is empty".into()));
        }

        // Reference pass on the bare word; only checks that embedding works
        let reference = self.embed_standalone(word)?;
        debug!("Reference vector for '{}' has {} dims", word, reference.len());

        let mut contexts = Vec::with_capacity(sentences.len());
        for (i, sentence) in sentences.iter().enumerate() {
            let context = self.locate_focus(word, sentence.as_ref())?;
            let focus_vector = self.focus_vector(&context)?;
            let predictions = self.predict_substitutes(word, &context, top_n)?;
            let neighbors = self.embed_neighbors(predictions)?;

            info!(
                "Context {}: focus span {}..{}, {} neighbors",
                i,
                context.focus_span.start,
                context.focus_span.end,
                neighbors.len()
            );

            contexts.push(ContextEmbedding {
                sentence: context.sentence,
                focus_span: context.focus_span,
                focus_vector,
                neighbors,
            });
        }

        Ok(ExtractionResult {
            word: word.to_string(),
            contexts,
        })
    }

    /// Tokenize `sentence` and find the focus word's token span
    pub fn locate_focus(&self, word: &str, sentence: &str) -> Result<Context> {
        let encoding = self.model.tokenize(sentence)?;
        let focus_span = match self.options.focus_match {
            FocusMatch::ExactToken => encoding.find_token(word).map(TokenSpan::single),
            FocusMatch::SubwordSpan => self.find_subword_span(word, sentence, &encoding)?,
        }
        .ok_or_else(|| VizError::FocusWordNotFound {
            word: word.to_string(),
            sentence: sentence.to_string(),
        })?;

        Ok(Context {
            sentence: sentence.to_string(),
            encoding,
            focus_span,
        })
    }

    fn find_subword_span(
        &self,
        word: &str,
        sentence: &str,
        encoding: &EncodingWithOffsets,
    ) -> Result<Option<TokenSpan>> {
        if let Some(idx) = encoding.find_token(word) {
            return Ok(Some(TokenSpan::single(idx)));
        }

        let pieces = self.model.tokenize(word)?.content_tokens();
        if let Some(span) = encoding.find_token_sequence(&pieces) {
            debug!("'{}' matched as pieces {:?}", word, pieces);
            return Ok(Some(span));
        }

        Ok(find_word_char_range(sentence, word).and_then(|(start, end)| {
            let positions = encoding.char_range_to_tokens(start, end);
            match (positions.first(), positions.last()) {
                (Some(&first), Some(&last)) => Some(TokenSpan::new(first, last + 1)),
                _ => None,
            }
        }))
    }

    /// Mean penultimate-layer state over the focus span
    pub fn focus_vector(&self, context: &Context) -> Result<Vec<f32>> {
        let cache = self.model.hidden_states(&context.encoding)?;
        let layer = cache.penultimate_index()?;
        cache.mean_over(layer, &context.focus_span.positions())
    }

    /// Mask the focus span and return the filtered top substitutes
    pub fn predict_substitutes(
        &self,
        word: &str,
        context: &Context,
        top_n: usize,
    ) -> Result<Vec<TokenPrediction>> {
        let (mask_id, mask_token) = self.model.mask_token();
        let masked = context
            .encoding
            .with_span_replaced(context.focus_span, mask_id, &mask_token);
        let position = context.focus_span.start;

        let logits = self.model.masked_logits(&masked, position)?;
        let k = top_n.saturating_mul(self.options.oversample_factor.max(1));
        let ranked = top_k_from_logits(&logits, k)?;

        // A sub-word match can differ from the word in case ("Pool" -> "pool")
        let mut focus_forms = vec![word];
        if context.focus_span.len() == 1 {
            if let Some(token) = context.encoding.tokens.get(position) {
                if token != word {
                    focus_forms.push(token.as_str());
                }
            }
        }
        let (kept, rejected) = filter_candidates(&self.model, &ranked, &focus_forms, top_n);

        debug!(
            "Ranked {} candidates, kept {}, rejected {}",
            ranked.len(),
            kept.len(),
            rejected.len()
        );
        Ok(kept)
    }

    /// Mean penultimate-layer state over the word pieces of `text` alone
    pub fn embed_standalone(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self.model.tokenize(text)?;
        let positions = content_positions(&encoding, text)?;
        let cache = self.model.hidden_states(&encoding)?;
        let layer = cache.penultimate_index()?;
        cache.mean_over(layer, &positions)
    }

    fn embed_neighbors(&self, predictions: Vec<TokenPrediction>) -> Result<Vec<Neighbor>> {
        let batch_size = self.options.neighbor_batch_size.max(1);
        if batch_size == 1 {
            return predictions
                .into_iter()
                .map(|p| {
                    let vector = self.embed_standalone(&p.token)?;
                    Ok(neighbor(p, vector))
                })
                .collect();
        }

        let mut neighbors = Vec::with_capacity(predictions.len());
        for chunk in predictions.chunks(batch_size) {
            let encodings = chunk
                .iter()
                .map(|p| self.model.tokenize(&p.token))
                .collect::<Result<Vec<_>>>()?;
            let caches = self.model.hidden_states_batch(&encodings)?;
            if caches.len() != chunk.len() {
                return Err(VizError::InvalidRequest(format!(
                    "batched inference returned {} results for {} inputs",
                    caches.len(),
                    chunk.len()
                )));
            }

            for ((prediction, encoding), cache) in chunk.iter().zip(&encodings).zip(&caches) {
                let positions = content_positions(encoding, &prediction.token)?;
                let layer = cache.penultimate_index()?;
                let vector = cache.mean_over(layer, &positions)?;
                neighbors.push(neighbor(prediction.clone(), vector));
            }
        }
        Ok(neighbors)
    }
}

fn neighbor(prediction: TokenPrediction, vector: Vec<f32>) -> Neighbor {
    Neighbor {
        token: prediction.token,
        token_id: prediction.token_id,
        probability: prediction.probability,
        vector,
    }
}

fn content_positions(encoding: &EncodingWithOffsets, text: &str) -> Result<Vec<usize>> {
    let positions = encoding.content_positions();
    if positions.is_empty() {
        return Err(VizError::Tokenization(format!(
            "'{text}' produced no word pieces"
        )));
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HiddenStateCache;
    use candle_core::{Device, Tensor};

    const VOCAB: [&str; 10] = [
        "[PAD]", "[CLS]", "[SEP]", "[MASK]", "the", "bank", "river", "##s", "shore", "money",
    ];

    /// Whitespace tokenizer over a tiny vocabulary; "banks" splits into "bank" "##s"
    struct ToyModel;

    impl ToyModel {
        fn id_of(token: &str) -> u32 {
            VOCAB.iter().position(|t| *t == token).unwrap_or(0) as u32
        }
    }

    impl MaskedLanguageModel for ToyModel {
        fn n_layers(&self) -> usize {
            2
        }

        fn d_model(&self) -> usize {
            4
        }

        fn tokenize(&self, text: &str) -> Result<EncodingWithOffsets> {
            let mut ids = vec![1];
            let mut tokens = vec!["[CLS]".to_string()];
            let mut offsets = vec![(0, 0)];
            let mut special = vec![true];
            let mut cursor = 0;
            for word in text.split_whitespace() {
                let start = text[cursor..].find(word).map_or(cursor, |p| p + cursor);
                cursor = start + word.len();
                let lower = word.to_lowercase();
                if let Some(stem) = lower.strip_suffix('s').filter(|s| VOCAB.contains(s)) {
                    for (piece, range) in [
                        (stem.to_string(), (start, cursor - 1)),
                        ("##s".to_string(), (cursor - 1, cursor)),
                    ] {
                        ids.push(Self::id_of(&piece));
                        tokens.push(piece);
                        offsets.push(range);
                        special.push(false);
                    }
                } else {
                    ids.push(Self::id_of(&lower));
                    tokens.push(lower);
                    offsets.push((start, cursor));
                    special.push(false);
                }
            }
            ids.push(2);
            tokens.push("[SEP]".to_string());
            offsets.push((0, 0));
            special.push(true);
            Ok(EncodingWithOffsets::new(ids, tokens, offsets, special))
        }

        fn mask_token(&self) -> (u32, String) {
            (3, "[MASK]".into())
        }

        fn decode_token(&self, token_id: u32) -> String {
            VOCAB[token_id as usize].to_string()
        }

        fn is_continuation(&self, token_id: u32) -> bool {
            VOCAB[token_id as usize].starts_with("##")
        }

        fn is_special(&self, token_id: u32) -> bool {
            token_id < 4
        }

        fn hidden_states(&self, encoding: &EncodingWithOffsets) -> Result<HiddenStateCache> {
            let mut cache = HiddenStateCache::with_capacity(3);
            for layer in 0..3 {
                let rows: Vec<f32> = encoding
                    .ids
                    .iter()
                    .enumerate()
                    .flat_map(|(pos, &id)| {
                        let base = id as f32 + layer as f32 * 100.0;
                        [base, pos as f32, 1.0, -base]
                    })
                    .collect();
                cache.push(Tensor::from_vec(rows, (encoding.len(), 4), &Device::Cpu)?);
            }
            Ok(cache)
        }

        fn masked_logits(
            &self,
            _encoding: &EncodingWithOffsets,
            _position: usize,
        ) -> Result<Tensor> {
            // "bank" > "##s" > "river" > "shore" > "money" > the rest
            let logits = [0.0f32, 0.0, 0.0, 0.0, 0.5, 9.0, 7.0, 8.0, 6.0, 5.0];
            Ok(Tensor::new(&logits, &Device::Cpu)?)
        }
    }

    #[test]
    fn test_locate_exact_token() {
        let extractor = EmbeddingExtractor::new(ToyModel);
        let context = extractor.locate_focus("bank", "the river bank").unwrap();
        assert_eq!(context.focus_span, TokenSpan::single(3));
    }

    #[test]
    fn test_exact_token_misses_split_word() {
        let extractor = EmbeddingExtractor::new(ToyModel);
        let err = extractor.locate_focus("banks", "the banks").unwrap_err();
        assert!(matches!(err, VizError::FocusWordNotFound { .. }));
    }

    #[test]
    fn test_subword_span_finds_split_word() {
        let options = ExtractorOptions {
            focus_match: FocusMatch::SubwordSpan,
            ..Default::default()
        };
        let extractor = EmbeddingExtractor::with_options(ToyModel, options);
        let context = extractor.locate_focus("banks", "the banks").unwrap();
        assert_eq!(context.focus_span, TokenSpan::new(2, 4));
    }

    #[test]
    fn test_focus_vector_uses_penultimate_layer() {
        let extractor = EmbeddingExtractor::new(ToyModel);
        let context = extractor.locate_focus("bank", "the bank").unwrap();
        let vector = extractor.focus_vector(&context).unwrap();
        // id 5 at layer 1, position 2
        assert_eq!(vector, vec![105.0, 2.0, 1.0, -105.0]);
    }

    #[test]
    fn test_neighbor_vector_uses_penultimate_layer() {
        let extractor = EmbeddingExtractor::new(ToyModel);
        let result = extractor.extract("bank", &["the bank"], 1).unwrap();
        let neighbor = &result.contexts[0].neighbors[0];
        assert_eq!(neighbor.token, "river");
        // "[CLS] river [SEP]": id 6 at layer 1, position 1
        assert_eq!(neighbor.vector, vec![106.0, 1.0, 1.0, -106.0]);
    }

    #[test]
    fn test_capitalized_word_is_not_its_own_neighbor() {
        let options = ExtractorOptions {
            focus_match: FocusMatch::SubwordSpan,
            ..Default::default()
        };
        let extractor = EmbeddingExtractor::with_options(ToyModel, options);
        let context = extractor.locate_focus("Bank", "the Bank").unwrap();
        assert_eq!(context.focus_span, TokenSpan::single(2));

        let predicted = extractor.predict_substitutes("Bank", &context, 2).unwrap();
        let tokens: Vec<&str> = predicted.iter().map(|p| p.token.as_str()).collect();
        assert_eq!(tokens, vec!["river", "shore"]);
    }

    #[test]
    fn test_substitutes_are_filtered() {
        let extractor = EmbeddingExtractor::new(ToyModel);
        let context = extractor.locate_focus("bank", "the bank").unwrap();
        let predicted = extractor.predict_substitutes("bank", &context, 2).unwrap();
        let tokens: Vec<&str> = predicted.iter().map(|p| p.token.as_str()).collect();
        assert_eq!(tokens, vec!["river", "shore"]);
    }

    #[test]
    fn test_extract_counts_and_order() {
        let extractor = EmbeddingExtractor::new(ToyModel);
        let result = extractor
            .extract("bank", &["the river bank", "the bank"], 3)
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.focus_vectors().len(), 2);
        assert_eq!(result.contexts[0].sentence, "the river bank");
        for context in &result.contexts {
            assert_eq!(context.neighbor_tokens(), vec!["river", "shore", "money"]);
            assert!(context.neighbors.iter().all(|n| n.vector.len() == 4));
        }
    }

    #[test]
    fn test_batched_neighbors_match_sequential() {
        let sequential = EmbeddingExtractor::new(ToyModel)
            .extract("bank", &["the bank"], 3)
            .unwrap();
        let options = ExtractorOptions {
            neighbor_batch_size: 2,
            ..Default::default()
        };
        let batched = EmbeddingExtractor::with_options(ToyModel, options)
            .extract("bank", &["the bank"], 3)
            .unwrap();

        assert_eq!(sequential.neighbors(), batched.neighbors());
    }

    #[test]
    fn test_missing_word_aborts_run() {
        let extractor = EmbeddingExtractor::new(ToyModel);
        let err = extractor
            .extract("bank", &["the bank", "the river"], 3)
            .unwrap_err();
        match err {
            VizError::FocusWordNotFound { sentence, .. } => assert_eq!(sentence, "the river"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
