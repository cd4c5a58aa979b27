use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::date_util::{first_of_month, parse_reference_date};
use crate::error::{Error, Result};
use crate::query::Filters;
use crate::storage::{DatabaseExecutor, Row};

const DATES_SQL: &str = r#"SELECT DISTINCT "data"
FROM "mapa_do_bosque"."dim_data"
WHERE "data" IS NOT NULL
ORDER BY "data" DESC"#;

const SHOPPINGS_SQL: &str = r#"SELECT DISTINCT "sigla", "nome_shopping"
FROM "mapa_do_bosque"."dm_shopping"
WHERE "sigla" IS NOT NULL
ORDER BY "sigla""#;

/// Columns of `Rgm_filtros` exposed as filter dimensions.
const RAMO: &str = "grupo";
const CATEGORIA: &str = "categoria";
const LOJA: &str = "name";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    pub datas: Vec<String>,
    pub shoppings: Vec<ShoppingOption>,
    pub ramos: Vec<String>,
    pub categorias: Vec<String>,
    pub lojas: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilteredOptions {
    pub ramos: Vec<String>,
    pub categorias: Vec<String>,
    pub lojas: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableDates {
    pub dates: Vec<String>,
    pub count: usize,
}

/// Query-string filters accepted by the chart and page endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterRequest {
    pub data_referencia: Option<String>,
    pub shopping: Option<String>,
    pub ramo: Option<String>,
    pub categoria: Option<String>,
    pub loja: Option<String>,
}

impl FilterRequest {
    fn has_rgm_dimension(&self) -> bool {
        [&self.ramo, &self.categoria, &self.loja]
            .iter()
            .any(|v| non_blank(v).is_some())
    }
}

/// Filters split into those applied to every chart and those applied only
/// to RGM charts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartFilters {
    pub common: Filters,
    pub rgm: Filters,
}

impl ChartFilters {
    /// Resolve a request for a whole page: `shopping` is common, and any RGM
    /// dimension is looked up as `chave` keys.
    pub async fn resolve(executor: &dyn DatabaseExecutor, request: &FilterRequest) -> Result<Self> {
        Self::resolve_with(executor, request, true).await
    }

    /// Filters for a single chart. The `chave` lookup only runs for RGM
    /// charts, so other charts never touch `Rgm_filtros`.
    pub async fn resolve_for_chart(
        executor: &dyn DatabaseExecutor,
        request: &FilterRequest,
        chart_id: &str,
    ) -> Result<Option<Filters>> {
        let filters = Self::resolve_with(executor, request, is_rgm_chart(chart_id)).await?;
        Ok(filters.for_chart(chart_id))
    }

    async fn resolve_with(
        executor: &dyn DatabaseExecutor,
        request: &FilterRequest,
        lookup_rgm: bool,
    ) -> Result<Self> {
        let mut filters = Self::default();
        if let Some(shopping) = non_blank(&request.shopping) {
            filters
                .common
                .insert("shopping".into(), Value::String(shopping.to_string()));
        }
        if lookup_rgm && request.has_rgm_dimension() {
            if let Some(chave) = resolve_rgm_chave(
                executor,
                non_blank(&request.ramo),
                non_blank(&request.categoria),
                non_blank(&request.loja),
            )
            .await?
            {
                filters.rgm.insert("chave".into(), chave);
            }
        }
        Ok(filters)
    }

    /// Filters for one chart, or `None` when nothing applies.
    pub fn for_chart(&self, chart_id: &str) -> Option<Filters> {
        let mut f = self.common.clone();
        if is_rgm_chart(chart_id) {
            for (k, v) in &self.rgm {
                f.insert(k.clone(), v.clone());
            }
        }
        (!f.is_empty()).then_some(f)
    }
}

/// RGM charts are recognised by `rgm` anywhere in their id.
pub fn is_rgm_chart(chart_id: &str) -> bool {
    chart_id.to_lowercase().contains("rgm")
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn column(rows: &[Row], name: &str) -> Vec<String> {
    rows.iter().filter_map(|r| text(r.get(name))).collect()
}

fn distinct_sql(col: &str, where_sql: &str) -> String {
    format!(
        r#"SELECT DISTINCT {col}
FROM "mapa_do_bosque"."Rgm_filtros"
WHERE {where_sql} AND {col} IS NOT NULL
ORDER BY {col}"#
    )
}

/// Every distinct value offered by the filter bar.
pub async fn filter_options(executor: &dyn DatabaseExecutor) -> Result<FilterOptions> {
    let none = Filters::new();
    let datas = column(&executor.execute(DATES_SQL, &none).await?, "data");
    let shoppings = executor
        .execute(SHOPPINGS_SQL, &none)
        .await?
        .iter()
        .filter_map(|r| {
            let value = text(r.get("sigla"))?;
            let label = text(r.get("nome_shopping")).unwrap_or_else(|| value.clone());
            Some(ShoppingOption { value, label })
        })
        .collect();

    let ramos = column(&executor.execute(&distinct_sql(RAMO, "1 = 1"), &none).await?, RAMO);
    let categorias = column(
        &executor.execute(&distinct_sql(CATEGORIA, "1 = 1"), &none).await?,
        CATEGORIA,
    );
    let lojas = column(&executor.execute(&distinct_sql(LOJA, "1 = 1"), &none).await?, LOJA);

    Ok(FilterOptions {
        datas,
        shoppings,
        ramos,
        categorias,
        lojas,
    })
}

/// Cascading options narrowed by the selections made so far.
pub async fn filtered_options(
    executor: &dyn DatabaseExecutor,
    shopping: Option<&str>,
    ramo: Option<&str>,
    categoria: Option<&str>,
) -> Result<FilteredOptions> {
    let mut clauses = vec!["1 = 1".to_string()];
    let mut params = Filters::new();
    for (col, param, value) in [
        ("sigla", "shopping", shopping),
        (RAMO, "ramo", ramo),
        (CATEGORIA, "categoria", categoria),
    ] {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            clauses.push(format!("{col} = :{param}"));
            params.insert(param.into(), Value::String(v.to_string()));
        }
    }
    let where_sql = clauses.join(" AND ");

    let ramos = column(&executor.execute(&distinct_sql(RAMO, &where_sql), &params).await?, RAMO);
    let categorias = column(
        &executor
            .execute(&distinct_sql(CATEGORIA, &where_sql), &params)
            .await?,
        CATEGORIA,
    );
    let lojas = column(&executor.execute(&distinct_sql(LOJA, &where_sql), &params).await?, LOJA);

    Ok(FilteredOptions {
        ramos,
        categorias,
        lojas,
    })
}

/// Reference dates with data, newest first, as `YYYY-MM-DD`.
pub async fn available_dates(executor: &dyn DatabaseExecutor) -> Result<AvailableDates> {
    let dates: Vec<String> = column(&executor.execute(DATES_SQL, &Filters::new()).await?, "data")
        .into_iter()
        .map(|d| d.chars().take(10).collect())
        .collect();
    Ok(AvailableDates {
        count: dates.len(),
        dates,
    })
}

/// Map RGM dimension selections to their `chave` keys.
///
/// Returns a single string for one key, a list for several, and `None`
/// when nothing matches.
pub async fn resolve_rgm_chave(
    executor: &dyn DatabaseExecutor,
    ramo: Option<&str>,
    categoria: Option<&str>,
    loja: Option<&str>,
) -> Result<Option<Value>> {
    let mut chaves: Vec<String> = Vec::new();
    for (col, value) in [(RAMO, ramo), (CATEGORIA, categoria), (LOJA, loja)] {
        let Some(value) = value else { continue };
        let mut params = Filters::new();
        params.insert("value".into(), Value::String(value.to_string()));
        let sql = format!(
            r#"SELECT DISTINCT chave FROM "mapa_do_bosque"."Rgm_filtros" WHERE {col} = :value ORDER BY chave"#
        );
        for chave in column(&executor.execute(&sql, &params).await?, "chave") {
            if !chaves.contains(&chave) {
                chaves.push(chave);
            }
        }
    }

    Ok(match chaves.len() {
        0 => None,
        1 => chaves.pop().map(Value::String),
        _ => Some(Value::Array(chaves.into_iter().map(Value::String).collect())),
    })
}

/// Instagram accounts, one attached schema per mall.
const INSTAGRAM_ACCOUNTS: [(&str, &str); 3] = [
    ("SCIB", "instagram_scib"),
    ("SBGP", "instagram_sbgp"),
    ("SBI", "instagram_sbi"),
];

/// Default number of posts returned by [`instagram_top_posts`].
pub const DEFAULT_TOP_POSTS: u32 = 3;

const FOLLOWERS_BLOCK: &str = r#"SELECT '{shopping}' AS shopping, date("startTime") AS data, "metricName" AS metrica, "value" AS value
    FROM "{schema}"."UserInsight"
    WHERE "metricName" = 'follower_demographics' AND date("startTime") <= :data_referencia"#;

const DAILY_BLOCK: &str = r#"SELECT '{shopping}' AS shopping,
        date(p."postedAt") AS data,
        COALESCE(SUM(i.likes), 0) AS total_likes,
        COALESCE(SUM(i.reach), 0) AS total_alcance,
        COALESCE(SUM(i.impressions), 0) AS total_impressoes,
        COALESCE(SUM(i.comments), 0) AS total_comentarios,
        COALESCE(SUM(i.shares), 0) AS total_compartilhamentos,
        COALESCE(SUM(i.saved), 0) AS total_salvos,
        COUNT(DISTINCT p.id) AS total_posts
    FROM "{schema}"."Post" p
    LEFT JOIN "{schema}"."PostInsight" i ON p.id = i."postId"
    WHERE date(p."postedAt") = :data_referencia
    GROUP BY date(p."postedAt")"#;

const MONTH_TO_DATE_BLOCK: &str = r#"SELECT '{shopping}' AS shopping,
        SUM(COALESCE(i.likes, 0) + COALESCE(i.comments, 0) + COALESCE(i.shares, 0) + COALESCE(i.saved, 0)) AS engajamento_acumulado,
        SUM(COALESCE(i.reach, 0)) AS alcance_acumulado,
        COUNT(DISTINCT date(p."postedAt")) AS dias_com_posts
    FROM "{schema}"."Post" p
    LEFT JOIN "{schema}"."PostInsight" i ON p.id = i."postId"
    WHERE date(p."postedAt") BETWEEN :inicio_mes AND :data_referencia"#;

const TOP_POSTS_BLOCK: &str = r#"SELECT '{shopping}' AS shopping,
        p."mediaUrl" AS link_foto,
        p."permalink" AS link_insta,
        date(p."postedAt") AS data,
        COALESCE(SUM(i.likes), 0) AS total_likes,
        COALESCE(SUM(i.comments), 0) AS total_comentarios,
        COALESCE(SUM(i.shares), 0) AS total_compartilhamentos,
        COALESCE(SUM(i.saved), 0) AS total_salvos
    FROM "{schema}"."Post" p
    LEFT JOIN "{schema}"."PostInsight" i ON p.id = i."postId"
    WHERE (:mes IS NULL OR strftime('%Y-%m', p."postedAt") = :mes)
    GROUP BY date(p."postedAt"), p."mediaUrl", p."permalink""#;

#[derive(Debug, Clone, Serialize)]
pub struct InstagramKpis {
    /// Latest follower snapshot per account on or before the reference date.
    pub seguidores: Vec<Row>,
    /// Reference-day totals with month-to-date engagement and reach averages.
    pub engagement: Vec<Row>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopPosts {
    pub posts: Vec<Row>,
}

fn union_accounts(block: &str) -> String {
    INSTAGRAM_ACCOUNTS
        .iter()
        .map(|(shopping, schema)| block.replace("{shopping}", shopping).replace("{schema}", schema))
        .collect::<Vec<_>>()
        .join("\n    UNION ALL\n    ")
}

fn followers_sql() -> String {
    format!(
        r#"WITH all_data AS (
    {}
),
latest AS (
    SELECT shopping, data, metrica, value,
        ROW_NUMBER() OVER (PARTITION BY shopping ORDER BY data DESC) AS rn
    FROM all_data
)
SELECT shopping, data, metrica, value
FROM latest
WHERE rn = 1 AND (:shopping IS NULL OR shopping = :shopping)
ORDER BY data DESC, shopping"#,
        union_accounts(FOLLOWERS_BLOCK)
    )
}

fn engagement_sql() -> String {
    format!(
        r#"WITH daily AS (
    {}
),
month_to_date AS (
    {}
)
SELECT
    d.shopping,
    d.data,
    d.total_likes,
    d.total_alcance,
    d.total_impressoes,
    d.total_comentarios,
    d.total_compartilhamentos,
    d.total_salvos,
    (d.total_likes + d.total_comentarios + d.total_compartilhamentos + d.total_salvos) AS engajamento_total,
    d.total_posts,
    COALESCE(m.engajamento_acumulado, 0) AS engajamento_total_mes,
    COALESCE(m.dias_com_posts, 0) AS dias_disponiveis,
    CASE WHEN COALESCE(m.dias_com_posts, 0) > 0
        THEN COALESCE(m.engajamento_acumulado, 0) * 1.0 / m.dias_com_posts
        ELSE 0 END AS engajamento_medio_dia,
    COALESCE(m.alcance_acumulado, 0) AS alcance_total_mes,
    CASE WHEN COALESCE(m.dias_com_posts, 0) > 0
        THEN COALESCE(m.alcance_acumulado, 0) * 1.0 / m.dias_com_posts
        ELSE 0 END AS alcance_medio_dia
FROM daily d
LEFT JOIN month_to_date m ON m.shopping = d.shopping
WHERE (:shopping IS NULL OR d.shopping = :shopping)
ORDER BY d.data DESC, d.shopping"#,
        union_accounts(DAILY_BLOCK),
        union_accounts(MONTH_TO_DATE_BLOCK)
    )
}

fn top_posts_sql() -> String {
    format!(
        r#"WITH all_data AS (
    {}
)
SELECT shopping, data, link_foto, link_insta,
    total_likes, total_comentarios, total_compartilhamentos, total_salvos,
    (total_likes + total_comentarios + total_compartilhamentos + total_salvos) AS engajamento_total
FROM all_data
WHERE (:shopping IS NULL OR shopping = :shopping)
ORDER BY engajamento_total DESC, data DESC
LIMIT :limit"#,
        union_accounts(TOP_POSTS_BLOCK)
    )
}

fn shopping_param(params: &mut Filters, shopping: Option<&str>) {
    if let Some(s) = shopping.map(str::trim).filter(|s| !s.is_empty()) {
        params.insert("shopping".into(), Value::String(s.to_string()));
    }
}

/// Instagram KPIs for one reference date, optionally for a single mall.
///
/// The reference date is required.
pub async fn instagram_kpis(
    executor: &dyn DatabaseExecutor,
    reference_date: Option<&str>,
    shopping: Option<&str>,
) -> Result<InstagramKpis> {
    let reference = match reference_date.map(str::trim).filter(|d| !d.is_empty()) {
        Some(d) => parse_reference_date(d)?,
        None => return Err(Error::BadRequest("data_referencia is required".into())),
    };

    let mut params = Filters::new();
    params.insert(
        "data_referencia".into(),
        Value::String(reference.format("%Y-%m-%d").to_string()),
    );
    params.insert(
        "inicio_mes".into(),
        Value::String(first_of_month(reference).format("%Y-%m-%d").to_string()),
    );
    shopping_param(&mut params, shopping);

    let seguidores = executor.execute(&followers_sql(), &params).await?;
    let engagement = executor.execute(&engagement_sql(), &params).await?;
    Ok(InstagramKpis {
        seguidores,
        engagement,
    })
}

/// Posts ranked by likes + comments + shares + saves.
///
/// With a reference date only posts from that calendar month count.
pub async fn instagram_top_posts(
    executor: &dyn DatabaseExecutor,
    reference_date: Option<&str>,
    shopping: Option<&str>,
    limit: u32,
) -> Result<TopPosts> {
    let mut params = Filters::new();
    if let Some(d) = reference_date.map(str::trim).filter(|d| !d.is_empty()) {
        let reference = parse_reference_date(d)?;
        params.insert(
            "mes".into(),
            Value::String(reference.format("%Y-%m").to_string()),
        );
    }
    shopping_param(&mut params, shopping);
    params.insert("limit".into(), Value::from(limit));

    let posts = executor.execute(&top_posts_sql(), &params).await?;
    Ok(TopPosts { posts })
}
