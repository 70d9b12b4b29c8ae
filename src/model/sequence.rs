use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Serialize, Deserialize};
use tracing::{debug, trace, Level};

use crate::{Loggable, log_at};

use super::*;

/// Counts [previous_label][current_label] of two adjacent clicks
pub type PairCounts = [[Count; 2]; 2];

/// Counts for items or pairs never seen in training
const SINGLE_PRIOR: [Count; 2] = [1, 1];
const PAIR_PRIOR: PairCounts = [[1, 1], [1, 1]];

/// Blend of the single-item and the pair estimate during prediction
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct SequenceWeights {
    pub single: f64,
    pub pair: f64,
}

/// Raw label counts of clicks and of adjacent click pairs.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct SequenceCounts {
    /// item -> [not_bought, bought]
    singles: FxHashMap<Item, [Count; 2]>,
    /// previous item -> current item -> [previous_label][current_label]
    pairs: FxHashMap<Item, FxHashMap<Item, PairCounts>>,
}

/// Smoothed counts. Every stored count is at least one.
#[derive( Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize )]
pub struct SequenceParameters {
    singles: FxHashMap<Item, [Count; 2]>,
    pairs: FxHashMap<Item, FxHashMap<Item, PairCounts>>,
}

/// First order model over click sequences.
/// A click's label depends on its item and on the previous click together with that click's label.
#[derive( Debug, Clone, Default )]
pub struct SequenceModel {
    weights: SequenceWeights,
    parameters: SequenceParameters,
}

/// Labels every click of the session.
///
/// A click is bought if a later buy of its item exists that no later click of the same item precedes,
/// i.e. a buy is attributed to the nearest click of its item before it.
pub fn label_clicks( session: &Session ) -> Vec<Label> {
    let mut buy_times: FxHashMap<&Item, Vec<Timestamp>> = FxHashMap::default();
    for buy in &session.buys {
	buy_times.entry( &buy.item ).or_default().push( buy.time );
    }

    let mut labels = vec!( Label::NotBought; session.clicks.len() );
    if buy_times.is_empty() {
	return labels
    }

    // earliest click of each item after the current position, filled back to front
    let mut next_click: FxHashMap<&Item, Timestamp> = FxHashMap::default();
    for (index, click) in session.clicks.iter().enumerate().rev() {
	let later = next_click.get( &click.item ).copied();
	if let Some( times ) = buy_times.get( &click.item ) {
	    let covered = times.iter()
		.any( |&buy_time| buy_time > click.time && later.map_or( true, |next| buy_time <= next ));
	    labels[ index ] = Label::from_flag( covered );
	}
	next_click.entry( &click.item )
	    .and_modify( |time| *time = (*time).min( click.time ))
	    .or_insert( click.time );
    }
    labels
}

impl Default for SequenceWeights {
    fn default() -> Self {
	SequenceWeights { single: 0.3, pair: 0.7 }
    }
}

impl SequenceWeights {
    pub fn new( single: f64, pair: f64 ) -> SequenceWeights {
	SequenceWeights { single, pair }
    }

    fn blend( &self, single: f64, pair: f64 ) -> f64 {
	self.single * single + self.pair * pair
    }
}

impl Cover for SequenceCounts {
    fn add_session( &mut self, session: &Session ) {
	let labels = label_clicks( session );
	self.add_sequence( &session.clicks, &labels );
    }

    fn merge( &mut self, other: Self ) {
	for (item, counts) in other.singles {
	    let entry = self.singles.entry( item ).or_insert( [0; 2] );
	    entry[ 0 ] += counts[ 0 ];
	    entry[ 1 ] += counts[ 1 ];
	}
	for (previous, successors) in other.pairs {
	    let row = self.pairs.entry( previous ).or_default();
	    for (current, counts) in successors {
		let entry = row.entry( current ).or_insert( [[0; 2]; 2] );
		for (left, right) in entry.iter_mut().flatten().zip( counts.iter().flatten() ) {
		    *left += *right;
		}
	    }
	}
    }

    fn is_empty( &self ) -> bool {
	self.singles.is_empty()
    }
}

impl SequenceCounts {
    pub fn new() -> SequenceCounts {
	SequenceCounts::default()
    }

    /// Counts labeled clicks and every pair of adjacent labeled clicks
    pub fn add_sequence( &mut self, clicks: &[ClickEvent], labels: &[Label] ) {
	debug_assert_eq!( clicks.len(), labels.len() );
	for (click, label) in clicks.iter().zip( labels ) {
	    self.singles.entry( click.item.clone() ).or_insert( [0; 2] )[ label.index() ] += 1;
	}
	for (pair, pair_labels) in clicks.windows( 2 ).zip( labels.windows( 2 )) {
	    let counts = self.pairs.entry( pair[ 0 ].item.clone() ).or_default()
		.entry( pair[ 1 ].item.clone() ).or_insert( [[0; 2]; 2] );
	    counts[ pair_labels[ 0 ].index() ][ pair_labels[ 1 ].index() ] += 1;
	}
    }

    pub fn single( &self, item: &str ) -> Option<[Count; 2]> {
	self.singles.get( item ).copied()
    }

    pub fn pair( &self, previous: &str, current: &str ) -> Option<PairCounts> {
	self.pairs.get( previous ).and_then( |row| row.get( current )).copied()
    }

    /// Adds one to every count, so no ratio downstream divides by zero
    pub fn smooth( self ) -> SequenceParameters {
	let singles = self.singles.into_iter()
	    .map( |(item, counts)| (item, [counts[ 0 ] + 1, counts[ 1 ] + 1]) )
	    .collect();
	let pairs = self.pairs.into_iter()
	    .map( |(previous, row)| {
		let row = row.into_iter()
		    .map( |(current, counts)| (current, counts.map( |inner| inner.map( |count| count + 1 ))) )
		    .collect();
		(previous, row)
	    }).collect();
	SequenceParameters { singles, pairs }
    }
}

impl SequenceParameters {
    /// Counts of the item, the uniform prior if the item is unknown
    pub fn single( &self, item: &str ) -> [Count; 2] {
	self.singles.get( item ).copied().unwrap_or( SINGLE_PRIOR )
    }

    /// Counts of the ordered pair, the uniform prior if the pair is unknown
    pub fn pair( &self, previous: &str, current: &str ) -> PairCounts {
	self.pairs.get( previous )
	    .and_then( |row| row.get( current ))
	    .copied()
	    .unwrap_or( PAIR_PRIOR )
    }

    pub fn number_items( &self ) -> usize {
	self.singles.len()
    }

    pub fn number_pairs( &self ) -> usize {
	self.pairs.values().map( |row| row.len() ).sum()
    }

    /// Checks that every count survived smoothing
    pub fn validate( &self ) -> Result<()> {
	let single_ok = self.singles.values().flatten().all( |count| *count >= 1 );
	let pair_ok = self.pairs.values()
	    .flat_map( |row| row.values() )
	    .flatten()
	    .flatten()
	    .all( |count| *count >= 1 );
	if single_ok && pair_ok {
	    Ok( () )
	} else {
	    Err( Error::Inconsistent( "sequence parameters contain unsmoothed zero counts".to_string() ))
	}
    }
}

impl Model for SequenceModel {
    type Cover = SequenceCounts;

    fn fit( &mut self, cover: Self::Cover ) -> Result<()> {
	let parameters = cover.smooth();
	debug!( "Smoothed {} items and {} pairs", parameters.number_items(), parameters.number_pairs() );
	self.parameters = parameters;
	Ok( () )
    }

    fn predict( &self, clicks: &[ClickEvent] ) -> Result<Vec<Item>> {
	let labels = self.predict_labels( clicks )?;
	let mut seen: FxHashSet<&Item> = FxHashSet::default();
	let bought = clicks.iter().zip( labels )
	    .filter( |&(_, label)| label.is_bought() )
	    .filter( |&(click, _)| seen.insert( &click.item ))
	    .map( |(click, _)| click.item.clone() )
	    .collect();
	Ok( bought )
    }
}

impl SequenceModel {
    pub fn new( weights: SequenceWeights ) -> SequenceModel {
	SequenceModel { weights, parameters: SequenceParameters::default() }
    }

    pub fn with_parameters( weights: SequenceWeights, parameters: SequenceParameters ) -> Result<SequenceModel> {
	parameters.validate()?;
	Ok( SequenceModel { weights, parameters } )
    }

    pub fn parameters( &self ) -> &SequenceParameters {
	&self.parameters
    }

    pub fn weights( &self ) -> SequenceWeights {
	self.weights
    }

    /// Labels the clicks in a single forward pass.
    /// Ties between buying and not buying go to not buying.
    pub fn predict_labels( &self, clicks: &[ClickEvent] ) -> Result<Vec<Label>> {
	let mut labels: Vec<Label> = Vec::with_capacity( clicks.len() );
	for (index, click) in clicks.iter().enumerate() {
	    let single = self.parameters.single( &click.item );
	    let label = match index.checked_sub( 1 ) {
		None => Label::from_flag( single[ 1 ] > single[ 0 ] ),
		Some( previous_index ) => {
		    let previous_label = labels[ previous_index ];
		    let pair = self.parameters.pair( &clicks[ previous_index ].item, &click.item );
		    let single_prob = normalize( single )?;
		    let pair_prob = normalize( pair[ previous_label.index() ] )?;
		    let prob = |label: Label| self.weights.blend( single_prob[ label.index() ], pair_prob[ label.index() ] );
		    trace!( "{}: buy {:.4} / not buy {:.4}", click.item, prob( Label::Bought ), prob( Label::NotBought ));
		    Label::from_flag( prob( Label::Bought ) > prob( Label::NotBought ))
		}
	    };
	    labels.push( label );
	}
	Ok( labels )
    }
}

impl Loggable for SequenceModel {
    fn log( &self, message: &str, level: Level ) {
	let text = format!(
	    "{message}: {} items, {} pairs, weights {:.2}/{:.2}",
	    self.parameters.number_items(), self.parameters.number_pairs(), self.weights.single, self.weights.pair
	);
	log_at( level, &text );
    }
}
