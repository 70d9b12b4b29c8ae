use rustc_hash::FxHashMap;
use serde::{Serialize, Deserialize};
use tracing::{debug, trace, Level};

use crate::{Loggable, log_at};

use super::*;

/// Clicks of one distinct item within a session
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct ItemActivity {
    pub item: Item,
    /// number of clicks on the item
    pub count: Count,
    /// bought anywhere in the session
    pub label: Label,
}

/// Raw co-occurrence weights: item -> sub item -> [not_bought, bought].
/// The label is the one of the target item, the weight is the sub item's click count.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct CooccurrenceCounts {
    table: FxHashMap<Item, FxHashMap<Item, [Count; 2]>>,
}

/// P( sub item co-occurs | item, label ) for both labels.
/// Both distributions range over the same sub items.
#[derive( Debug, Clone, Default, PartialEq, Serialize, Deserialize )]
pub struct ConditionalDistribution {
    not_bought: FxHashMap<Item, f64>,
    bought: FxHashMap<Item, f64>,
}

#[derive( Debug, Clone, Default, PartialEq, Serialize, Deserialize )]
pub struct NaiveBayesParameters {
    table: FxHashMap<Item, ConditionalDistribution>,
}

/// Classifies every clicked item by the items clicked alongside it.
#[derive( Debug, Clone, Default )]
pub struct NaiveBayesModel {
    parameters: NaiveBayesParameters,
}

/// Click counts per distinct item, in order of the first click
pub fn count_clicks( clicks: &[ClickEvent] ) -> Vec<(&Item, Count)> {
    let mut position: FxHashMap<&Item, usize> = FxHashMap::default();
    let mut counts: Vec<(&Item, Count)> = Vec::new();
    for click in clicks {
	match position.get( &click.item ) {
	    Some( index ) => counts[ *index ].1 += 1,
	    None => {
		position.insert( &click.item, counts.len() );
		counts.push( (&click.item, 1) );
	    }
	}
    }
    counts
}

/// Aggregates the session's clicks per item. An item counts as bought if it appears among the buys at all.
pub fn aggregate_clicks( session: &Session ) -> Vec<ItemActivity> {
    let bought = session.bought_items();
    count_clicks( &session.clicks ).into_iter()
	.map( |(item, count)| ItemActivity {
	    item: item.clone(),
	    count,
	    label: Label::from_flag( bought.contains( item )),
	}).collect()
}

impl Cover for CooccurrenceCounts {
    fn add_session( &mut self, session: &Session ) {
	let activities = aggregate_clicks( session );
	self.add_activities( &activities );
    }

    fn merge( &mut self, other: Self ) {
	for (item, other_row) in other.table {
	    let row = self.table.entry( item ).or_default();
	    for (sub_item, counts) in other_row {
		let entry = row.entry( sub_item ).or_insert( [0; 2] );
		entry[ 0 ] += counts[ 0 ];
		entry[ 1 ] += counts[ 1 ];
	    }
	}
    }

    fn is_empty( &self ) -> bool {
	self.table.is_empty()
    }
}

impl CooccurrenceCounts {
    pub fn new() -> CooccurrenceCounts {
	CooccurrenceCounts::default()
    }

    /// Every item collects the click counts of all items of the session, itself included
    pub fn add_activities( &mut self, activities: &[ItemActivity] ) {
	for target in activities {
	    let row = self.table.entry( target.item.clone() ).or_default();
	    for sub in activities {
		row.entry( sub.item.clone() ).or_insert( [0; 2] )[ target.label.index() ] += sub.count;
	    }
	}
    }

    pub fn get( &self, item: &str, sub_item: &str ) -> Option<[Count; 2]> {
	self.table.get( item ).and_then( |row| row.get( sub_item )).copied()
    }

    /// Adds one to the weight of every referenced sub item under both labels
    /// and normalizes the weights per item and label into distributions.
    pub fn smooth( self ) -> Result<NaiveBayesParameters> {
	let mut table: FxHashMap<Item, ConditionalDistribution> = FxHashMap::default();
	table.reserve( self.table.len() );
	for (item, row) in self.table {
	    let smoothed = |label: Label| -> FxHashMap<Item, Count> {
		row.iter().map( |(sub_item, counts)| (sub_item.clone(), counts[ label.index() ] + 1) ).collect()
	    };
	    let not_bought = normalize_distribution( smoothed( Label::NotBought ))?;
	    let bought = normalize_distribution( smoothed( Label::Bought ))?;
	    table.insert( item, ConditionalDistribution { not_bought, bought } );
	}
	Ok( NaiveBayesParameters { table } )
    }
}

impl ConditionalDistribution {
    pub fn given( &self, label: Label ) -> &FxHashMap<Item, f64> {
	match label {
	    Label::NotBought => &self.not_bought,
	    Label::Bought => &self.bought,
	}
    }

    /// Probabilities of the sub item under [not_bought, bought], if it ever co-occurred
    pub fn get( &self, sub_item: &str ) -> Option<[f64; 2]> {
	match (self.not_bought.get( sub_item ), self.bought.get( sub_item )) {
	    (Some( not_bought ), Some( bought )) => Some( [*not_bought, *bought] ),
	    _ => None,
	}
    }
}

impl NaiveBayesParameters {
    pub fn get( &self, item: &str ) -> Option<&ConditionalDistribution> {
	self.table.get( item )
    }

    pub fn number_items( &self ) -> usize {
	self.table.len()
    }

    /// Checks that both distributions of every item share their support and sum to one
    pub fn validate( &self ) -> Result<()> {
	let tolerance = 1e-6;
	for (item, distribution) in &self.table {
	    if distribution.not_bought.len() != distribution.bought.len()
		|| distribution.not_bought.keys().any( |sub_item| !distribution.bought.contains_key( sub_item ))
	    {
		return Err( Error::Inconsistent( format!( "distributions of item {item} differ in support" )))
	    }
	    for label in Label::ALL {
		let weights = distribution.given( label );
		let total: f64 = weights.values().sum();
		if (total - 1.0).abs() > tolerance || weights.values().any( |p| !(*p > 0.0) ) {
		    return Err( Error::Inconsistent( format!( "distribution of item {item} under {label:?} is not normalized" )))
		}
	    }
	}
	Ok( () )
    }
}

impl Model for NaiveBayesModel {
    type Cover = CooccurrenceCounts;

    fn fit( &mut self, cover: Self::Cover ) -> Result<()> {
	let parameters = cover.smooth()?;
	debug!( "Normalized distributions of {} items", parameters.number_items() );
	self.parameters = parameters;
	Ok( () )
    }

    fn predict( &self, clicks: &[ClickEvent] ) -> Result<Vec<Item>> {
	let counts = count_clicks( clicks );
	let mut bought = Vec::new();
	for (item, _) in &counts {
	    let [not_buy_loglik, buy_loglik] = self.calc_loglik( item, &counts );
	    trace!( "{item}: buy {buy_loglik:.4} / not buy {not_buy_loglik:.4}" );
	    // unknown items tie at zero and are not bought
	    if buy_loglik > not_buy_loglik {
		bought.push( (*item).clone() );
	    }
	}
	Ok( bought )
    }
}

impl NaiveBayesModel {
    pub fn new() -> NaiveBayesModel {
	NaiveBayesModel::default()
    }

    pub fn with_parameters( parameters: NaiveBayesParameters ) -> Result<NaiveBayesModel> {
	parameters.validate()?;
	Ok( NaiveBayesModel { parameters } )
    }

    pub fn parameters( &self ) -> &NaiveBayesParameters {
	&self.parameters
    }

    /// Log likelihood [not_bought, bought] of the session's clicks given the item's label.
    /// Each co-occurring item contributes once per click.
    pub fn calc_loglik( &self, item: &str, counts: &[(&Item, Count)] ) -> [f64; 2] {
	let mut loglik = [0.0; 2];
	let distribution = match self.parameters.get( item ) {
	    Some( distribution ) => distribution,
	    None => return loglik,
	};
	for (sub_item, count) in counts {
	    if let Some( probabilities ) = distribution.get( sub_item ) {
		for label in Label::ALL {
		    loglik[ label.index() ] += probabilities[ label.index() ].ln() * *count as f64;
		}
	    }
	}
	loglik
    }
}

impl Loggable for NaiveBayesModel {
    fn log( &self, message: &str, level: Level ) {
	let sub_items: usize = self.parameters.table.values().map( |d| d.not_bought.len() ).sum();
	let text = format!( "{message}: {} items, {sub_items} co-occurrences", self.parameters.number_items() );
	log_at( level, &text );
    }
}
