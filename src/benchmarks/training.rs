use tracing::{info, debug};
use tracing_subscriber;

use rand::prelude::*;
use statrs::distribution::DiscreteUniform;

use std::time::*;

use buypredict::*;
use buypredict::model::{NaiveBayesModel, SequenceModel};

fn main() -> Result<()> {
    prepare_logging();

    let number_sessions = 100000;
    let number_items = 5000;
    let store = generate_sessions( number_sessions, number_items, 20, 0.05 )?;
    info!( "Generated {} sessions, {} with buys", store.len(), store.buyer_count() );

    benchmark_model( "sequence", &store, SequenceModel::default )?;
    benchmark_model( "naive bayes", &store, NaiveBayesModel::new )?;

    Ok( () )
}

fn benchmark_model<M, F>( name: &str, store: &SessionStore, create: F ) -> Result<()> where
    M: Model + Loggable,
    F: Fn() -> M,
{
    let observer = SilentObserver;

    info!( "Start benchmark: {name} training" );
    let mut model = create();
    let start = Instant::now();
    Trainer::new( &observer ).train( store, &mut model )?;
    info!( "Result: sequential training took {}ms", start.elapsed().as_millis() );

    let mut model = create();
    let start = Instant::now();
    Trainer::new( &observer ).with_parallel( true ).train( store, &mut model )?;
    info!( "Result: parallel training took {}ms", start.elapsed().as_millis() );

    info!( "Start benchmark: {name} prediction" );
    let start = Instant::now();
    let predictions = Predictor::new( &observer ).predict( store, &model )?;
    info!( "Result: prediction took {}ms, {} sessions predicted", start.elapsed().as_millis(), predictions.len() );

    let answers = evaluation::answers_from_store( store );
    let report = Evaluation::new( store.len() )?.evaluate( &predictions, &answers );
    debug!( "in-sample score {:.3} precision {:.3}", report.score, report.precision );
    Ok( () )
}

/// Random sessions whose lengths and items are uniformly distributed.
/// Every click is followed by a buy of its item with the given probability.
fn generate_sessions( number_sessions: usize, number_items: i64, max_length: i64, buy_probability: f64 ) -> Result<SessionStore> {
    let length_distribution = DiscreteUniform::new( 1, max_length )
	.map_err( |err| Error::Inconsistent( err.to_string() ))?;
    let item_distribution = DiscreteUniform::new( 0, number_items - 1 )
	.map_err( |err| Error::Inconsistent( err.to_string() ))?;
    let mut rng = thread_rng();

    let mut store = SessionStore::new();
    for session in 0 .. number_sessions {
	let id = session.to_string();
	let length = length_distribution.sample( &mut rng ) as i64;
	for time in 0 .. length {
	    let item = ( item_distribution.sample( &mut rng ) as i64 ).to_string();
	    if rng.gen_bool( buy_probability ) {
		store.add_buy( &id, BuyEvent::new( item.clone(), time * 10 + 5 ));
	    }
	    store.add_click( &id, ClickEvent::new( item, time * 10 ));
	}
    }
    Ok( store )
}

fn prepare_logging() {
    let tracer = tracing_subscriber::fmt::fmt()
	.with_max_level( tracing_subscriber::filter::LevelFilter::INFO )
	.finish();
    tracing::subscriber::set_global_default( tracer ).unwrap();
}
