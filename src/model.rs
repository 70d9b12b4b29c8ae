
use rustc_hash::FxHashMap;
use serde::{Serialize, Deserialize};

use crate::*;

pub mod naive_bayes;
pub mod sequence;

pub use naive_bayes::{NaiveBayesModel, NaiveBayesParameters, CooccurrenceCounts, ItemActivity};
pub use sequence::{SequenceModel, SequenceParameters, SequenceCounts, SequenceWeights};

/// Whether a click (or an item) ends in a purchase
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize )]
pub enum Label {
    NotBought = 0,
    Bought = 1,
}

/// Sufficient statistics gathered from a corpus of sessions.
///
/// Covers of disjoint parts of a corpus merge into the cover of the whole corpus,
/// regardless of how the corpus was split.
pub trait Cover: Default + Send {
    /// Labels the session and adds its counts
    fn add_session( &mut self, session: &Session );

    /// Adds the counts of another cover componentwise
    fn merge( &mut self, other: Self );

    fn is_empty( &self ) -> bool;
}

pub trait Model {
    /// contains sufficient stats gathered from the data set
    type Cover: Cover;

    /// Covers the sessions to obtain the model's stats
    fn cover <'a, I> ( &self, sessions: I ) -> Self::Cover where I: Iterator<Item = &'a Session> {
	let mut cover = Self::Cover::default();
	for session in sessions {
	    cover.add_session( session );
	}
	cover
    }

    /// Smooths the counts of the cover into the model's parameters, replacing the old ones
    fn fit( &mut self, cover: Self::Cover ) -> Result<()>;

    /// Items of an unseen click sequence that are predicted to be bought
    fn predict( &self, clicks: &[ClickEvent] ) -> Result<Vec<Item>>;
}

impl Label {
    pub const ALL: [Label; 2] = [Label::NotBought, Label::Bought];

    pub fn from_flag( bought: bool ) -> Label {
	if bought { Label::Bought } else { Label::NotBought }
    }

    /// Position of the label in count tables
    pub fn index( self ) -> usize {
	self as usize
    }

    pub fn is_bought( self ) -> bool {
	self == Label::Bought
    }
}

/// Turns counts per label into probabilities per label
pub fn normalize( counts: [Count; 2] ) -> Result<[f64; 2]> {
    let total = counts[ 0 ] + counts[ 1 ];
    if total == 0 {
	return Err( Error::Inconsistent( "label counts without mass".to_string() ))
    }
    let total = total as f64;
    Ok( [counts[ 0 ] as f64 / total, counts[ 1 ] as f64 / total] )
}

/// Divides every weight by the total weight, so the weights form a distribution
pub fn normalize_distribution( weights: FxHashMap<Item, Count> ) -> Result<FxHashMap<Item, f64>> {
    let total: Count = weights.values().sum();
    if total == 0 {
	return Err( Error::Inconsistent( "co-occurrence weights without mass".to_string() ))
    }
    let total = total as f64;
    Ok( weights.into_iter().map( |(item, weight)| (item, weight as f64 / total) ).collect() )
}
