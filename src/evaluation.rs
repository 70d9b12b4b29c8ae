use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashSet;
use tracing::{info, info_span};

use crate::*;
use crate::trainer::Predictions;

/// Number of sessions in the RecSys Challenge 2015 test set
pub const CHALLENGE_SESSIONS: usize = 9_249_729;

/// Items actually bought, per buyer session
pub type Answers = BTreeMap<SessionId, Vec<Item>>;

/// Scores predictions against the true purchases over a universe of sessions.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct Evaluation {
    total_sessions: usize,
}

#[derive( Debug, Clone, Copy, PartialEq )]
pub struct Report {
    pub score: f64,
    /// lowest and highest attainable score
    pub score_range: (f64, f64),
    pub precision: f64,
}

/// Collects the distinct bought items of every session with buys
pub fn answers_from_store( store: &SessionStore ) -> Answers {
    store.iter()
	.filter( |(_, session)| session.is_buyer() )
	.map( |(id, session)| {
	    let items: BTreeSet<&Item> = session.buys.iter().map( |buy| &buy.item ).collect();
	    (id.clone(), items.into_iter().cloned().collect())
	}).collect()
}

impl Default for Evaluation {
    fn default() -> Self {
	Evaluation { total_sessions: CHALLENGE_SESSIONS }
    }
}

impl Evaluation {
    pub fn new( total_sessions: usize ) -> Result<Evaluation> {
	if total_sessions == 0 {
	    return Err( Error::Inconsistent( "evaluation needs at least one session".to_string() ))
	}
	Ok( Evaluation { total_sessions } )
    }

    pub fn total_sessions( &self ) -> usize {
	self.total_sessions
    }

    /// Share of buyer sessions in the universe, gained or lost per predicted session
    pub fn increment_unit( &self, answers: &Answers ) -> f64 {
	answers.len() as f64 / self.total_sessions as f64
    }

    /// Challenge score: every predicted buyer session earns the increment unit plus the Jaccard overlap
    /// of predicted and bought items, every predicted non-buyer session costs the increment unit.
    pub fn score( &self, predictions: &Predictions, answers: &Answers ) -> f64 {
	let unit = self.increment_unit( answers );
	let mut score = 0.0;
	for (session, predicted) in predictions {
	    match answers.get( session ) {
		Some( bought ) => score += unit + jaccard( predicted, bought ),
		None => score -= unit,
	    }
	}
	score
    }

    /// Bounds of the score: predicting every session with perfect items, or predicting only non-buyers
    pub fn score_range( &self, answers: &Answers ) -> (f64, f64) {
	let buyers = answers.len() as f64;
	let base = buyers * buyers / self.total_sessions as f64;
	(base - buyers, base + buyers)
    }

    /// Agreement of predicted and true buyer sessions over the whole universe.
    /// Correctly leaving out a non-buyer counts as much as finding a buyer.
    pub fn precision( &self, predictions: &Predictions, answers: &Answers ) -> f64 {
	let intersection = predictions.keys().filter( |session| answers.contains_key( *session )).count();
	let union = predictions.len() + answers.len() - intersection;
	let total = self.total_sessions as f64;
	(intersection as f64 + total - union as f64) / total
    }

    pub fn evaluate( &self, predictions: &Predictions, answers: &Answers ) -> Report {
	let _span = info_span!( "evaluation", predicted = predictions.len(), buyers = answers.len() ).entered();
	let report = Report {
	    score: self.score( predictions, answers ),
	    score_range: self.score_range( answers ),
	    precision: self.precision( predictions, answers ),
	};
	info!( "score {:.4} in [{:.4}, {:.4}], precision {:.6}", report.score, report.score_range.0, report.score_range.1, report.precision );
	report
    }
}

/// |A ∩ B| / |A ∪ B| of the item sets, zero if both are empty
fn jaccard( left: &[Item], right: &[Item] ) -> f64 {
    let left: FxHashSet<&Item> = left.iter().collect();
    let right: FxHashSet<&Item> = right.iter().collect();
    let union = left.union( &right ).count();
    if union == 0 {
	return 0.0
    }
    left.intersection( &right ).count() as f64 / union as f64
}

#[cfg(test)]
mod test {
    use super::*;

    fn mapping( entries: &[(&str, Vec<&str>)] ) -> BTreeMap<SessionId, Vec<Item>> {
	entries.iter()
	    .map( |(session, items)| (session.to_string(), items.iter().map( |i| i.to_string() ).collect()) )
	    .collect()
    }

    #[test]
    fn test_score_hit() {
	let evaluation = Evaluation::new( 10 ).unwrap();
	let predictions = mapping( &[("s1", vec!( "A", "B" ))] );
	let answers = mapping( &[("s1", vec!( "A", "C" ))] );
	assert_approx!( evaluation.increment_unit( &answers ), 0.1, 1e-12 );
	assert_approx!( evaluation.score( &predictions, &answers ), 0.1 + 1.0 / 3.0, 1e-9 );
    }

    #[test]
    /// Predicting a non-buyer costs, unpredicted buyers are neutral
    fn test_score_miss() {
	let evaluation = Evaluation::new( 10 ).unwrap();
	let predictions = mapping( &[("s3", vec!( "X" )), ("s1", vec!( "A" ))] );
	let answers = mapping( &[("s1", vec!( "A" )), ("s2", vec!( "B" ))] );
	// unit 0.2: +0.2 + 1.0 for s1, -0.2 for s3
	assert_approx!( evaluation.score( &predictions, &answers ), 1.0, 1e-9 );
	assert_approx!( evaluation.score( &Predictions::new(), &answers ), 0.0, 1e-12 );
    }

    #[test]
    fn test_precision() {
	let evaluation = Evaluation::new( 10 ).unwrap();
	let predictions = mapping( &[("s1", vec!( "A" ))] );
	let answers = mapping( &[("s1", vec!( "A" )), ("s2", vec!( "B" ))] );
	assert_approx!( evaluation.precision( &predictions, &answers ), 0.9, 1e-12 );

	// predicting nothing is right about every non-buyer
	assert_approx!( evaluation.precision( &Predictions::new(), &answers ), 0.8, 1e-12 );
    }

    #[test]
    fn test_score_range() {
	let evaluation = Evaluation::new( 10 ).unwrap();
	let answers = mapping( &[("s1", vec!( "A" )), ("s2", vec!( "B" ))] );
	let (low, high) = evaluation.score_range( &answers );
	assert_approx!( low, 0.4 - 2.0, 1e-12 );
	assert_approx!( high, 0.4 + 2.0, 1e-12 );
    }

    #[test]
    fn test_evaluate_report() {
	let evaluation = Evaluation::new( 10 ).unwrap();
	let predictions = mapping( &[("s1", vec!( "A", "B" ))] );
	let answers = mapping( &[("s1", vec!( "A", "C" ))] );
	let report = evaluation.evaluate( &predictions, &answers );
	assert_approx!( report.score, 0.4333, 1e-4 );
	assert_approx!( report.precision, 1.0, 1e-12 );
    }

    #[test]
    fn test_zero_sessions_rejected() {
	assert!( Evaluation::new( 0 ).is_err() );
	assert_eq!( Evaluation::default().total_sessions(), CHALLENGE_SESSIONS );
    }

    #[test]
    fn test_answers_from_store() {
	let mut store = SessionStore::new();
	store.add_click( "1", ClickEvent::new( "A", 1 ));
	store.add_buy( "1", BuyEvent::new( "B", 2 ));
	store.add_buy( "1", BuyEvent::new( "A", 3 ));
	store.add_buy( "1", BuyEvent::new( "B", 4 ));
	store.add_click( "2", ClickEvent::new( "C", 1 ));

	let answers = answers_from_store( &store );
	assert_eq!( answers, mapping( &[("1", vec!( "A", "B" ))] ));
    }

    #[test]
    fn test_jaccard() {
	let items = |names: &[&str]| -> Vec<Item> { names.iter().map( |n| n.to_string() ).collect() };
	assert_approx!( jaccard( &items( &["A", "B"] ), &items( &["B", "C"] )), 1.0 / 3.0, 1e-12 );
	assert_approx!( jaccard( &items( &["A", "A"] ), &items( &["A"] )), 1.0, 1e-12 );
	assert_approx!( jaccard( &[], &[] ), 0.0, 1e-12 );
    }
}
