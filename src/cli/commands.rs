use crate::app::{AppContext, Result, TributaryError};
use crate::domain::rss_cache_key;
use crate::foreground::LoadOutcome;
use crate::orchestrator::RunSummary;
use crate::source::catalog::CATALOG_PROVIDER;
use crate::store::ArticleStore;

pub async fn refresh(ctx: &AppContext) -> Result<()> {
    let plan = ctx.refresh_plan();
    if plan.is_empty() {
        println!("Nothing configured to refresh");
        return Ok(());
    }

    println!("Refreshing {} tasks...", plan.len());
    let summary = ctx.orchestrator.refresh_all(plan).await;
    print_summary(&summary);

    ctx.store.cleanup();
    Ok(())
}

pub async fn refresh_my_feed(ctx: &AppContext) -> Result<()> {
    let plan = ctx.my_feed_plan();
    if plan.is_empty() {
        println!("No followed categories or personal feed configured");
        return Ok(());
    }

    let summary = ctx.orchestrator.refresh_my_feed(plan).await;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Refresh complete: {} succeeded, {} failed of {} scheduled",
        summary.succeeded, summary.failed, summary.scheduled
    );
    if summary.timed_out {
        println!("  (timed out; whatever arrived in time was kept)");
    }
}

pub fn list_articles(ctx: &AppContext, feed_id: &str, limit: Option<usize>) -> Result<()> {
    let articles = ctx.store.articles(feed_id, limit);

    if articles.is_empty() {
        println!("No cached articles for {}", feed_id);
        return Ok(());
    }

    for article in articles {
        let date = article
            .published_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "          ".to_string());
        println!("{} {} ({})", date, article.title, article.display_source());
    }

    Ok(())
}

pub fn show_counts(ctx: &AppContext) -> Result<()> {
    let categories = ctx.tracking.category_counts();
    let sources = ctx.tracking.source_counts();

    if categories.is_empty() && sources.is_empty() {
        println!("Nothing tracked yet; run a refresh first");
        return Ok(());
    }

    if !categories.is_empty() {
        println!("Categories:");
        for (category_id, count) in categories {
            println!("  {} {}/{} unread", category_id, count.unread, count.total);
        }
    }
    if !sources.is_empty() {
        println!("Sources:");
        for (source_name, count) in sources {
            println!("  {} {}/{} unread", source_name, count.unread, count.total);
        }
    }

    Ok(())
}

pub async fn show(ctx: &AppContext, url: Option<&str>, category: Option<&str>) -> Result<()> {
    let outcome = match (url, category) {
        (Some(url), _) => {
            ctx.foreground
                .load_feed(&rss_cache_key(url), url, None)
                .await?
        }
        (None, Some(category)) => {
            ctx.foreground
                .load_category(CATALOG_PROVIDER, category)
                .await?
        }
        (None, None) => {
            return Err(TributaryError::Config(
                "pass --url or --category to show".into(),
            ))
        }
    };

    match outcome {
        LoadOutcome::Loaded { label, articles } => {
            if let Some(label) = label {
                println!("{}", label);
            }
            if articles.is_empty() {
                println!("(no articles)");
            }
            for article in articles {
                println!("  {} \n    {}", article.title, article.url);
            }
        }
        LoadOutcome::Cancelled => println!("Load superseded by a newer one"),
    }

    Ok(())
}

pub fn mark_read(ctx: &AppContext, url: &str) -> Result<()> {
    ctx.tracking.mark_viewed(url);
    ctx.tracking.persist();
    println!("Marked viewed: {}", url);
    Ok(())
}

pub async fn fetch_media(ctx: &AppContext, url: &str) -> Result<()> {
    match ctx.fetch_media(url).await {
        Some(bytes) => println!(
            "Fetched {} bytes ({} entries cached)",
            bytes.len(),
            ctx.media_cached()
        ),
        None => eprintln!("Could not fetch {}", url),
    }
    Ok(())
}

pub fn cleanup(ctx: &AppContext) -> Result<()> {
    ctx.store.cleanup();
    println!("Cleanup complete");
    Ok(())
}

pub fn clear(ctx: &AppContext, feed_id: Option<&str>) -> Result<()> {
    match feed_id {
        Some(feed_id) => {
            ctx.store.clear_feed(feed_id);
            println!("Cleared cached articles for {}", feed_id);
        }
        None => {
            ctx.store.clear_all();
            ctx.tracking.clear();
            ctx.tracking.persist();
            println!("Cleared article cache and tracking state");
        }
    }
    Ok(())
}
