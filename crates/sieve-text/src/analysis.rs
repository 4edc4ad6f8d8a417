use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const TOKENIZER_NAME: &str = "text_with_stopwords";
pub const KEY_FIELD: &str = "__key";
pub const TEXT_FIELD: &str = "text";

pub const STOP_WORDS: &[&str] = &[
	"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
];

/// Two fields: the encoded key (raw, stored) and the analysed content.
pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field(KEY_FIELD, STRING | STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TOKENIZER_NAME).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	schema_builder.add_text_field(TEXT_FIELD, TextOptions::default().set_indexing_options(text_field_indexing));
	schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| (*s).to_string())))
		.build();
	index.tokenizers().register(TOKENIZER_NAME, tokenizer);
}

/// Lowercased alphanumeric tokens with stop words removed, in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
	text.split(|c: char| !c.is_alphanumeric())
		.filter(|t| !t.is_empty())
		.map(str::to_lowercase)
		.filter(|t| !STOP_WORDS.contains(&t.as_str()))
		.collect()
}
